//! Interactive confirmation seam.
//!
//! Bucket deletion and state reset are irreversible, so they go through this
//! trait. The stdin implementation refuses when no interactive terminal is
//! attached; tests and the smoke mode substitute [`AutoConfirm`].

use std::io::{self, BufRead, IsTerminal, Write};

pub trait Confirm: Send + Sync {
    /// Shows the prompt and returns whether the operator answered "yes".
    fn confirm(&self, prompt: &str) -> bool;
}

/// Reads the answer from standard input.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        // Non-interactive execution must never delete anything.
        if !io::stdin().is_terminal() {
            println!("{} no (stdin is not a terminal)", prompt);
            return false;
        }

        print!("{} ", prompt);
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("yes")
    }
}

/// Fixed answer, for tests and the smoke flow.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}
