//! Primitive I/O with an explicitly declared file byte order (spec §4.1).
//!
//! The file's endianness is a property of the trajectory, recorded once in
//! the general-info block; every integer and float on disk is read/written
//! against that declared order regardless of the host's native layout. Host
//! layout is classified once, lazily, by probing a known bit pattern — mirrors
//! the teacher's `Decoder`/`Config` split (`rufs::decoder::Config`), except we
//! carry our own byte-shuffling instead of delegating it to `bincode`, since
//! strings and stride-shaped payloads need layout control `bincode` doesn't
//! give us for free.

use std::io::{self, Read, Write};
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Declared endianness of a trajectory file (spec §6, `tng_file_endianness`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEndianness {
	Big,
	Little,
}

/// Host layout of 32-bit values, probed once (spec §4.1, `tng_endianness_32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostLayout32 {
	Big,
	Little,
	BytePairSwap,
}

/// Host layout of 64-bit values, probed once (spec §4.1, `tng_endianness_64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostLayout64 {
	Big,
	Little,
	QuadSwap,
	BytePairSwap,
	ByteSwap,
}

impl HostLayout32 {
	/// Permutation from native byte order into canonical big-endian order.
	fn to_be_perm(self) -> [usize; 4] {
		match self {
			HostLayout32::Big => [0, 1, 2, 3],
			HostLayout32::Little => [3, 2, 1, 0],
			HostLayout32::BytePairSwap => [1, 0, 3, 2],
		}
	}

	fn probe() -> Self {
		let native = 0x0102_0304u32.to_ne_bytes();
		match native {
			[0x01, 0x02, 0x03, 0x04] => HostLayout32::Big,
			[0x04, 0x03, 0x02, 0x01] => HostLayout32::Little,
			[0x02, 0x01, 0x04, 0x03] => HostLayout32::BytePairSwap,
			// Every target Rust actually compiles for is Big or Little; the
			// remaining classification exists so the probe stays total.
			other => {
				log::warn!("unrecognised 32-bit host layout {other:?}, assuming little-endian");
				HostLayout32::Little
			}
		}
	}
}

impl HostLayout64 {
	fn to_be_perm(self) -> [usize; 8] {
		match self {
			HostLayout64::Big => [0, 1, 2, 3, 4, 5, 6, 7],
			HostLayout64::Little => [7, 6, 5, 4, 3, 2, 1, 0],
			HostLayout64::QuadSwap => [4, 5, 6, 7, 0, 1, 2, 3],
			HostLayout64::BytePairSwap => [1, 0, 3, 2, 5, 4, 7, 6],
			HostLayout64::ByteSwap => [3, 2, 1, 0, 7, 6, 5, 4],
		}
	}

	fn probe() -> Self {
		let native = 0x0102_0304_0506_0708u64.to_ne_bytes();
		match native {
			[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08] => HostLayout64::Big,
			[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01] => HostLayout64::Little,
			other => {
				log::warn!("unrecognised 64-bit host layout {other:?}, assuming little-endian");
				HostLayout64::Little
			}
		}
	}
}

struct HostProbe {
	layout32: HostLayout32,
	layout64: HostLayout64,
}

static HOST_PROBE: OnceLock<HostProbe> = OnceLock::new();

fn host_probe() -> &'static HostProbe {
	HOST_PROBE.get_or_init(|| HostProbe {
		layout32: HostLayout32::probe(),
		layout64: HostLayout64::probe(),
	})
}

fn to_canonical_be<const N: usize>(native: [u8; N], perm: &[usize]) -> [u8; N] {
	let mut out = [0u8; N];
	for (i, &p) in perm.iter().enumerate() {
		out[i] = native[p];
	}
	out
}

/// Maximum length in bytes of any length-prefixed string on disk (spec §4.1, §6).
pub const MAX_STR_LEN: usize = 1024;

/// Reader/writer for the fixed-width primitives and length-prefixed strings
/// that make up every block on disk, against a declared [`FileEndianness`].
#[derive(Debug, Clone, Copy)]
pub struct Primitives {
	pub endianness: FileEndianness,
}

impl Primitives {
	pub fn new(endianness: FileEndianness) -> Self {
		Self { endianness }
	}

	fn be32(&self, v: u32) -> [u8; 4] {
		let native = v.to_ne_bytes();
		let be = to_canonical_be(native, &host_probe().layout32.to_be_perm());
		match self.endianness {
			FileEndianness::Big => be,
			FileEndianness::Little => {
				let mut le = be;
				le.reverse();
				le
			}
		}
	}

	fn be64(&self, v: u64) -> [u8; 8] {
		let native = v.to_ne_bytes();
		let be = to_canonical_be(native, &host_probe().layout64.to_be_perm());
		match self.endianness {
			FileEndianness::Big => be,
			FileEndianness::Little => {
				let mut le = be;
				le.reverse();
				le
			}
		}
	}

	fn from_file_bytes32(&self, bytes: [u8; 4]) -> u32 {
		let be = match self.endianness {
			FileEndianness::Big => bytes,
			FileEndianness::Little => {
				let mut b = bytes;
				b.reverse();
				b
			}
		};
		u32::from_be_bytes(be)
	}

	fn from_file_bytes64(&self, bytes: [u8; 8]) -> u64 {
		let be = match self.endianness {
			FileEndianness::Big => bytes,
			FileEndianness::Little => {
				let mut b = bytes;
				b.reverse();
				b
			}
		};
		u64::from_be_bytes(be)
	}

	pub fn read_u32<R: Read>(&self, r: &mut R) -> Result<u32> {
		let mut buf = [0u8; 4];
		r.read_exact(&mut buf)?;
		Ok(self.from_file_bytes32(buf))
	}

	pub fn read_i32<R: Read>(&self, r: &mut R) -> Result<i32> {
		Ok(self.read_u32(r)? as i32)
	}

	pub fn read_u64<R: Read>(&self, r: &mut R) -> Result<u64> {
		let mut buf = [0u8; 8];
		r.read_exact(&mut buf)?;
		Ok(self.from_file_bytes64(buf))
	}

	pub fn read_i64<R: Read>(&self, r: &mut R) -> Result<i64> {
		Ok(self.read_u64(r)? as i64)
	}

	pub fn read_f32<R: Read>(&self, r: &mut R) -> Result<f32> {
		Ok(f32::from_bits(self.read_u32(r)?))
	}

	pub fn read_f64<R: Read>(&self, r: &mut R) -> Result<f64> {
		Ok(f64::from_bits(self.read_u64(r)?))
	}

	pub fn write_u32<W: Write>(&self, w: &mut W, v: u32) -> Result<()> {
		w.write_all(&self.be32(v))?;
		Ok(())
	}

	pub fn write_i32<W: Write>(&self, w: &mut W, v: i32) -> Result<()> {
		self.write_u32(w, v as u32)
	}

	pub fn write_u64<W: Write>(&self, w: &mut W, v: u64) -> Result<()> {
		w.write_all(&self.be64(v))?;
		Ok(())
	}

	pub fn write_i64<W: Write>(&self, w: &mut W, v: i64) -> Result<()> {
		self.write_u64(w, v as u64)
	}

	pub fn write_f32<W: Write>(&self, w: &mut W, v: f32) -> Result<()> {
		self.write_u32(w, v.to_bits())
	}

	pub fn write_f64<W: Write>(&self, w: &mut W, v: f64) -> Result<()> {
		self.write_u64(w, v.to_bits())
	}

	/// Reads a length-prefixed (u32 byte count), not-null-terminated string.
	///
	/// Names longer than [`MAX_STR_LEN`] are truncated at the API boundary and
	/// reported as [`Error::Truncated`] — a non-critical status per spec §4.1.
	pub fn read_string<R: Read>(&self, r: &mut R) -> Result<(String, Option<Error>)> {
		let len = self.read_u32(r)? as usize;
		let mut buf = vec![0u8; len];
		r.read_exact(&mut buf)?;
		let s = String::from_utf8_lossy(&buf).into_owned();
		if s.len() > MAX_STR_LEN {
			let truncated = s.as_bytes()[..MAX_STR_LEN].to_vec();
			let truncated = String::from_utf8_lossy(&truncated).into_owned();
			let warn = Error::Truncated {
				available: MAX_STR_LEN,
				needed: s.len(),
			};
			return Ok((truncated, Some(warn)));
		}
		Ok((s, None))
	}

	/// Writes a length-prefixed string, truncating to [`MAX_STR_LEN`] bytes.
	pub fn write_string<W: Write>(&self, w: &mut W, s: &str) -> Result<()> {
		let bytes = if s.len() > MAX_STR_LEN {
			log::warn!("string of {} bytes truncated to {MAX_STR_LEN}", s.len());
			&s.as_bytes()[..MAX_STR_LEN]
		} else {
			s.as_bytes()
		};
		self.write_u32(w, bytes.len() as u32)?;
		w.write_all(bytes)?;
		Ok(())
	}
}

/// Reads exactly `len` bytes into a freshly allocated buffer, mapping short
/// reads to [`Error::Io`].
pub fn read_exact_vec<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
	let mut buf = vec![0u8; len];
	r.read_exact(&mut buf)
		.map_err(|e| Error::Io(io::Error::new(e.kind(), format!("short read of {len} bytes"))))?;
	Ok(buf)
}
