//! Options passed with every unit of work.
//!
//! Two independent flags:
//! - read-only: the transaction sees a snapshot and rejects writes
//! - inner: attach to the transaction already running on this flow instead
//!   of starting a new one

use std::fmt;

use serde::{Deserialize, Serialize};

/// Options for a single `transact` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactOptions {
    /// Run as a read-only transaction.
    pub read_only: bool,
    /// Attach to the transaction already active on this flow, if any.
    pub inner: bool,
}

impl TransactOptions {
    /// Read-write options (the default).
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only options.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    /// Set the read-only flag.
    pub fn with_read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set the inner flag.
    pub fn with_inner(mut self, value: bool) -> Self {
        self.inner = value;
        self
    }
}

impl fmt::Display for TransactOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read_only {
            write!(f, "READ ONLY")?;
        } else {
            write!(f, "READ WRITE")?;
        }
        if self.inner {
            write!(f, " INNER")?;
        }
        Ok(())
    }
}

/// Parse options from string (SQL-like syntax).
impl std::str::FromStr for TransactOptions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let (mode, inner) = match upper.strip_suffix("INNER") {
            Some(rest) => (rest.trim_end(), true),
            None => (upper.as_str(), false),
        };

        let read_only = match mode {
            "READ ONLY" | "READ_ONLY" | "READONLY" => true,
            "READ WRITE" | "READ_WRITE" | "READWRITE" | "" => false,
            _ => return Err(format!("unknown transaction mode: {}", s)),
        };

        Ok(Self { read_only, inner })
    }
}
