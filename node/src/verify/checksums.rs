//! Stage two: size and checksum recomputation.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use md5::Md5;
use sev_common::format::{calculate_eta_bytes, format_bytes};
use sev_common::progress::ProgressTracker;
use sha2::{Digest, Sha256};

use crate::errors::MigrationError;
use crate::verify::inventory::ExpectedFile;

/// Content is read in 1 MiB chunks so memory stays bounded.
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Progress cadence: every ~2 seconds or every 100 files.
const PROGRESS_FILE_INTERVAL: u64 = 100;

/// At most this many content errors are shown verbatim.
const MAX_ERROR_DISPLAY: usize = 10;

#[derive(Default)]
pub struct VerifyStats {
    pub verified_count: u64,
    pub size_verified: u64,
    pub checksum_verified: u64,
    pub total_bytes_verified: u64,
}

/// Streams a file through the digest and returns the lowercase hex result.
pub fn hash_file_hex<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Multipart entity tags are not content hashes; the part boundaries that
/// produced them are gone. A streaming SHA-256 read-through still proves the
/// bytes are readable end to end.
fn verify_multipart_file(key: &str, path: &Path, stats: &mut VerifyStats, errors: &mut Vec<String>) {
    match hash_file_hex::<Sha256>(path) {
        Ok(_) => {
            stats.checksum_verified += 1;
            stats.verified_count += 1;
        }
        Err(error) => errors.push(format!("{}: file health check failed: {}", key, error)),
    }
}

/// Single-part entity tags equal the content MD5, so the roundtrip can be
/// checked exactly.
fn verify_singlepart_file(
    key: &str,
    path: &Path,
    expected_etag: &str,
    stats: &mut VerifyStats,
    errors: &mut Vec<String>,
) {
    let expected = expected_etag.trim_matches('"');
    match hash_file_hex::<Md5>(path) {
        Ok(computed) if computed == expected => {
            stats.checksum_verified += 1;
            stats.verified_count += 1;
        }
        Ok(computed) => errors.push(format!(
            "{}: checksum mismatch (expected {}, got {})",
            key, expected, computed
        )),
        Err(error) => errors.push(format!("{}: checksum computation failed: {}", key, error)),
    }
}

fn verify_single_file(
    key: &str,
    path: &Path,
    expected: &ExpectedFile,
    stats: &mut VerifyStats,
    errors: &mut Vec<String>,
) {
    let actual_size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            errors.push(format!("{}: stat failed: {}", key, error));
            return;
        }
    };

    if actual_size != expected.size {
        errors.push(format!(
            "{}: size mismatch (expected {}, got {})",
            key,
            format_bytes(expected.size),
            format_bytes(actual_size)
        ));
        return;
    }
    stats.size_verified += 1;
    stats.total_bytes_verified += actual_size;

    if expected.etag.contains('-') {
        verify_multipart_file(key, path, stats, errors);
    } else {
        verify_singlepart_file(key, path, &expected.etag, stats, errors);
    }
}

fn display_progress(
    start: Instant,
    stats: &VerifyStats,
    expected_files: u64,
    expected_size: u64,
) {
    let elapsed = start.elapsed().as_secs_f64();
    let file_pct = if expected_files > 0 {
        stats.verified_count as f64 / expected_files as f64 * 100.0
    } else {
        0.0
    };
    let eta = calculate_eta_bytes(elapsed, stats.total_bytes_verified, expected_size);
    print!(
        "\r  Progress: {}/{} files ({:.1}%), {}/{}, ETA: {}  ",
        stats.verified_count,
        expected_files,
        file_pct,
        format_bytes(stats.total_bytes_verified),
        format_bytes(expected_size),
        eta
    );
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// Validates every expected file by recomputing sizes and checksums, in
/// sorted key order.
pub fn verify_files(
    bucket: &str,
    local_files: &BTreeMap<String, PathBuf>,
    expected_file_map: &BTreeMap<String, ExpectedFile>,
    expected_files: u64,
    expected_size: u64,
) -> Result<VerifyStats, MigrationError> {
    println!("  Verifying file sizes and checksums...");
    println!("  (This reads all files to recompute digests - may take time for large files)");
    println!();

    let mut stats = VerifyStats::default();
    let mut errors: Vec<String> = Vec::new();
    let mut tracker = ProgressTracker::new(Duration::from_secs(2));
    let start = Instant::now();

    for (key, expected) in expected_file_map {
        // Inventory already passed, so the local path must exist.
        let Some(path) = local_files.get(key) else {
            errors.push(format!("{}: vanished between inventory and content check", key));
            continue;
        };
        verify_single_file(key, path, expected, &mut stats, &mut errors);
        if tracker.should_update() || stats.verified_count % PROGRESS_FILE_INTERVAL == 0 {
            display_progress(start, &stats, expected_files, expected_size);
        }
    }
    println!();
    println!();

    if !errors.is_empty() {
        let mut details: Vec<String> = errors.iter().take(MAX_ERROR_DISPLAY).cloned().collect();
        if errors.len() > MAX_ERROR_DISPLAY {
            details.push(format!("... and {} more", errors.len() - MAX_ERROR_DISPLAY));
        }
        return Err(MigrationError::Verification {
            bucket: bucket.to_string(),
            details: details.join("\n"),
        });
    }

    Ok(stats)
}
