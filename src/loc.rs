//! Call-site capture.
//!
//! Every chain-building entry point is `#[track_caller]`; [`Loc::here`]
//! reads the caller's file and line so the bounded trace of a holder can
//! name the sites that built and drove the chain.

use serde::Serialize;
use std::fmt;

/// A captured source location (file and line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Loc {
    file: &'static str,
    line: u32,
}

impl Loc {
    /// Captures the caller's location.
    #[must_use]
    #[track_caller]
    pub fn here() -> Self {
        let caller = std::panic::Location::caller();
        Self {
            file: caller.file(),
            line: caller.line(),
        }
    }

    /// The source file.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// The line number.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
