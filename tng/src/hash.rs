//! Block integrity hashing (spec §4.3).
//!
//! The MD5 primitive itself is an external collaborator (spec §1); this
//! module only frames the contract the block engine needs: hash a body,
//! compare against a stored digest, and carry the 16-byte field even when
//! hashing is disabled on write (all-zero in that case).

use md5::{Digest, Md5};

/// Length in bytes of the hash field every block header carries.
pub const HASH_LEN: usize = 16;

/// Per-operation hash mode (spec §4.3, `tng_hash_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
	Skip,
	Use,
}

/// Which digest a block's hash field holds. The on-disk field is always 16
/// bytes; `None` means hashing was disabled when the block was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashKind {
	#[default]
	None,
	Md5,
}

pub fn md5_of(body: &[u8]) -> [u8; HASH_LEN] {
	let mut hasher = Md5::new();
	hasher.update(body);
	hasher.finalize().into()
}

pub fn zero_hash() -> [u8; HASH_LEN] {
	[0u8; HASH_LEN]
}

pub fn is_zero(hash: &[u8; HASH_LEN]) -> bool {
	hash.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_vector() {
		// MD5("") = d41d8cd98f00b204e9800998ecf8427e
		let digest = md5_of(b"");
		assert_eq!(
			digest,
			[
				0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
				0x42, 0x7e
			]
		);
	}
}
