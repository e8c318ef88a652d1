use std::io;

use thiserror::Error;

/// The error taxonomy of the trajectory engine (spec §7).
///
/// Every variant maps to exactly one [`Status`] via [`Error::status`]:
/// `NotFound`, `Truncated` and `HashMismatch` are recoverable; the file can
/// still be used afterwards. `FormatViolation`, `Io` and `Alloc` are
/// critical: the container must be destroyed, not reused.
#[derive(Debug, Error)]
pub enum Error {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("value truncated to fit caller buffer ({available} < {needed} bytes)")]
	Truncated { available: usize, needed: usize },

	#[error("MD5 hash mismatch for block {block_id:#x} ({block_name:?})")]
	HashMismatch { block_id: i64, block_name: String },

	#[error("format violation: {0}")]
	FormatViolation(String),

	#[error("I/O failure: {0}")]
	Io(#[from] io::Error),

	#[error("allocation failure: {0}")]
	Alloc(String),
}

/// Tri-state outcome of an operation (spec §6, §7).
///
/// `Critical` implies the container may no longer be used for I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	Success,
	Recoverable,
	Critical,
}

impl Error {
	pub fn status(&self) -> Status {
		match self {
			Error::NotFound(_) | Error::Truncated { .. } | Error::HashMismatch { .. } => {
				Status::Recoverable
			}
			Error::FormatViolation(_) | Error::Io(_) | Error::Alloc(_) => Status::Critical,
		}
	}

	pub fn is_critical(&self) -> bool {
		self.status() == Status::Critical
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// Turns a critical-or-recoverable [`Result`] into a `(value, Status)` pair
/// for callers that want the legacy non-throwing status signal instead of
/// propagating with `?`, matching the public surface described in spec §6.
pub fn status_of<T>(r: &Result<T>) -> Status {
	match r {
		Ok(_) => Status::Success,
		Err(e) => e.status(),
	}
}
