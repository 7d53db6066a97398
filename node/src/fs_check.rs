//! Destination drive checks.

use std::path::Path;

use crate::errors::MigrationError;

/// Verifies the destination drive is mounted and writable before any
/// filesystem write phase.
///
/// The parent of the base path must already exist (a missing parent means
/// the drive is not mounted); the base path itself is created when needed.
pub fn check_drive_available(base_path: &Path) -> Result<(), MigrationError> {
    let parent = base_path.parent().unwrap_or(base_path);
    if !parent.exists() {
        return Err(MigrationError::DriveNotAvailable {
            path: parent.to_path_buf(),
        });
    }

    match std::fs::create_dir_all(base_path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(MigrationError::PermissionDenied {
                path: base_path.to_path_buf(),
            })
        }
        Err(error) => Err(error.into()),
    }
}
