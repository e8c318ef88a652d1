//! Common block framing shared by every on-disk block (spec §4.2, §6).
//!
//! ```text
//! i64 size | i64 block_type | i64 block_id | u8[16] md5 | u32 name_len |
//! u8[name_len] name | i64 version | body[size - header_len]
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use crate::endian::Primitives;
use crate::error::{Error, Result};
use crate::hash::{self, HashMode, HASH_LEN};

/// Whether a block precedes the first frame set (root-owned) or lives inside
/// one (spec §6, `tng_block_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
	NonTrajectory,
	Trajectory,
}

/// Well-known block ids (spec §6).
pub mod ids {
	pub const GENERAL_INFO: i64 = 0x0000_0000_0000_0000;
	pub const MOLECULES: i64 = 0x0000_0000_0000_0001;
	pub const TRAJECTORY_FRAME_SET: i64 = 0x0000_0000_0000_0002;
	pub const PARTICLE_MAPPING: i64 = 0x0000_0000_0000_0003;

	pub const TRAJ_BOX_SHAPE: i64 = 0x0000_0000_1000_0000;
	pub const TRAJ_POSITIONS: i64 = 0x0000_0000_1000_0001;
	pub const TRAJ_VELOCITIES: i64 = 0x0000_0000_1000_0002;
	pub const TRAJ_FORCES: i64 = 0x0000_0000_1000_0003;
	pub const TRAJ_PARTIAL_CHARGES: i64 = 0x0000_0000_1000_0004;
	pub const TRAJ_FORMAL_CHARGES: i64 = 0x0000_0000_1000_0005;
	pub const TRAJ_B_FACTORS: i64 = 0x0000_0000_1000_0006;
	pub const TRAJ_ANISOTROPIC_B_FACTORS: i64 = 0x0000_0000_1000_0007;
	pub const TRAJ_OCCUPANCY: i64 = 0x0000_0000_1000_0008;

	/// GROMACS extension: free-energy lambda, kept as a first-class `util_*`
	/// pair alongside positions/velocities/forces (SPEC_FULL.md #3).
	pub const GMX_LAMBDA: i64 = 0x1000_0000_1000_0000;

	/// Vendor extension prefix (spec §6); any id with this high bit set is a
	/// vendor-defined block the engine stores opaquely.
	pub const VENDOR_PREFIX: i64 = 0x1000_0000_0000_0000u64 as i64;

	pub fn is_vendor(id: i64) -> bool {
		(id as u64) & (VENDOR_PREFIX as u64) != 0
	}
}

/// The header every block carries, decoded but with the body left unread.
#[derive(Debug, Clone)]
pub struct BlockHeader {
	pub size: i64,
	pub kind: BlockKind,
	pub id: i64,
	pub hash: [u8; HASH_LEN],
	pub name: String,
	pub version: i64,
}

/// Size in bytes of the fixed-width part of the header (excludes the
/// variable-length name).
pub(crate) fn fixed_header_len() -> usize {
	8 + 8 + 8 + HASH_LEN + 4 + 8
}

impl BlockHeader {
	pub fn header_len(&self) -> usize {
		fixed_header_len() + self.name.len()
	}

	/// Parses a header and verifies `size` is at least as large as the header
	/// itself; format violation on anything smaller or negative (spec §3
	/// invariant: "Block header byte length equals the measured size of the
	/// body").
	pub fn read<R: Read>(r: &mut R, prim: &Primitives) -> Result<Self> {
		let size = prim.read_i64(r)?;
		let kind = match prim.read_i64(r)? {
			0 => BlockKind::NonTrajectory,
			1 => BlockKind::Trajectory,
			other => {
				return Err(Error::FormatViolation(format!(
					"unknown block type tag {other}"
				)))
			}
		};
		let id = prim.read_i64(r)?;
		let mut hash = [0u8; HASH_LEN];
		r.read_exact(&mut hash)?;
		let (name, trunc) = prim.read_string(r)?;
		if let Some(e) = trunc {
			log::warn!("block name truncated: {e}");
		}
		let version = prim.read_i64(r)?;

		let header = Self {
			size,
			kind,
			id,
			hash,
			name,
			version,
		};
		if size < 0 || (size as usize) < header.header_len() {
			return Err(Error::FormatViolation(format!(
				"block {id:#x} declares size {size} smaller than its own header"
			)));
		}
		Ok(header)
	}

	pub fn body_len(&self) -> usize {
		self.size as usize - self.header_len()
	}

	/// Verifies `body` against the header's hash in `HashMode::Use`; a
	/// mismatch is recoverable and does not stop the caller from reading
	/// subsequent blocks (spec §4.3).
	pub fn verify(&self, body: &[u8], mode: HashMode) -> Result<()> {
		if mode == HashMode::Skip {
			return Ok(());
		}
		if hash::is_zero(&self.hash) {
			// Hashing was disabled on write; nothing to compare against.
			return Ok(());
		}
		let computed = hash::md5_of(body);
		if computed != self.hash {
			return Err(Error::HashMismatch {
				block_id: self.id,
				block_name: self.name.clone(),
			});
		}
		Ok(())
	}
}

/// Writes a block's header + body, back-patching `size` and (optionally) the
/// MD5 hash after the body has been buffered (spec §4.2: "When hashing is
/// enabled on write, the body is buffered, hashed, then emitted with hash
/// patched in").
pub fn write_block<W: Write + Seek>(
	w: &mut W,
	prim: &Primitives,
	kind: BlockKind,
	id: i64,
	name: &str,
	version: i64,
	body: &[u8],
	hash_mode: HashMode,
) -> Result<()> {
	let start = w.stream_position()?;

	let hash = if hash_mode == HashMode::Use {
		hash::md5_of(body)
	} else {
		hash::zero_hash()
	};

	prim.write_i64(w, 0)?; // size placeholder
	prim.write_i64(w, match kind {
		BlockKind::NonTrajectory => 0,
		BlockKind::Trajectory => 1,
	})?;
	prim.write_i64(w, id)?;
	w.write_all(&hash)?;
	prim.write_string(w, name)?;
	prim.write_i64(w, version)?;
	w.write_all(body)?;

	let end = w.stream_position()?;
	let size = (end - start) as i64;
	w.seek(SeekFrom::Start(start))?;
	prim.write_i64(w, size)?;
	w.seek(SeekFrom::Start(end))?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::endian::FileEndianness;

	#[test]
	fn round_trip_header() {
		let prim = Primitives::new(FileEndianness::Little);
		let mut buf = Cursor::new(Vec::new());
		write_block(
			&mut buf,
			&prim,
			BlockKind::NonTrajectory,
			ids::GENERAL_INFO,
			"GENERAL INFO",
			3,
			b"hello",
			HashMode::Use,
		)
		.unwrap();

		buf.set_position(0);
		let header = BlockHeader::read(&mut buf, &prim).unwrap();
		assert_eq!(header.id, ids::GENERAL_INFO);
		assert_eq!(header.name, "GENERAL INFO");
		assert_eq!(header.version, 3);
		assert_eq!(header.body_len(), 5);

		let mut body = vec![0u8; header.body_len()];
		buf.read_exact(&mut body).unwrap();
		assert_eq!(body, b"hello");
		header.verify(&body, HashMode::Use).unwrap();
	}

	#[test]
	fn tamper_detected_in_use_mode_only() {
		let prim = Primitives::new(FileEndianness::Big);
		let mut buf = Cursor::new(Vec::new());
		write_block(
			&mut buf,
			&prim,
			BlockKind::Trajectory,
			ids::TRAJ_POSITIONS,
			"POSITIONS",
			1,
			b"0123456789",
			HashMode::Use,
		)
		.unwrap();

		buf.set_position(0);
		let header = BlockHeader::read(&mut buf, &prim).unwrap();
		let mut body = vec![0u8; header.body_len()];
		buf.read_exact(&mut body).unwrap();
		body[0] ^= 0xff;

		assert!(header.verify(&body, HashMode::Use).is_err());
		assert!(header.verify(&body, HashMode::Skip).is_ok());
	}
}
