//! Frame-set header: forward/previous/medium/long pointers, and seeking by
//! frame number or ordinal (spec §4.5).
//!
//! spec.md §3 describes, per stride length, only the backward ("preceding")
//! pointer; §4.5's own header description ("next/prev long/medium/short
//! pointer slots") and the seek-by-ordinal algorithm both require a forward
//! variant too, or the skip list could never accelerate a forward walk from
//! the first frame set. This is resolved in DESIGN.md: each stride length
//! gets both a `*_next_pos` and `*_prev_pos`, matching §4.5's header prose;
//! the back-patching step in §4.5 ("On append") only ever needs to write the
//! `*_prev_pos` half and the one `*_next_pos` it closes over.

use std::io::{Read, Write};

use crate::data_block::DataBlock;
use crate::endian::Primitives;
use crate::error::{Error, Result};
use crate::mapping::ParticleMapping;

/// Sentinel for an absent pointer (spec §3 "Frame set pointer fields are
/// either −1 (absent) or point to a valid frame-set header").
pub const NONE_POINTER: i64 = -1;

/// On-disk frame-set header (spec §3 "Frame set", §4.5).
#[derive(Debug, Clone)]
pub struct FrameSetHeader {
	pub first_frame: i64,
	pub frame_count: i64,
	pub first_frame_time: f64,
	/// Number of frames actually written so far; may be `< frame_count`
	/// while a frame set is being populated (spec §4.5).
	pub frames_written: i64,
	/// File position of this header.
	pub this_pos: i64,
	pub next_pos: i64,
	pub prev_pos: i64,
	pub medium_next_pos: i64,
	pub medium_prev_pos: i64,
	pub long_next_pos: i64,
	pub long_prev_pos: i64,
}

impl FrameSetHeader {
	pub fn read<R: Read>(r: &mut R, prim: &Primitives) -> Result<Self> {
		let first_frame = prim.read_i64(r)?;
		let frame_count = prim.read_i64(r)?;
		let first_frame_time = prim.read_f64(r)?;
		let frames_written = prim.read_i64(r)?;
		let this_pos = prim.read_i64(r)?;
		let next_pos = prim.read_i64(r)?;
		let prev_pos = prim.read_i64(r)?;
		let medium_next_pos = prim.read_i64(r)?;
		let medium_prev_pos = prim.read_i64(r)?;
		let long_next_pos = prim.read_i64(r)?;
		let long_prev_pos = prim.read_i64(r)?;
		Ok(Self {
			first_frame,
			frame_count,
			first_frame_time,
			frames_written,
			this_pos,
			next_pos,
			prev_pos,
			medium_next_pos,
			medium_prev_pos,
			long_next_pos,
			long_prev_pos,
		})
	}

	pub fn write<W: Write>(&self, w: &mut W, prim: &Primitives) -> Result<()> {
		prim.write_i64(w, self.first_frame)?;
		prim.write_i64(w, self.frame_count)?;
		prim.write_f64(w, self.first_frame_time)?;
		prim.write_i64(w, self.frames_written)?;
		prim.write_i64(w, self.this_pos)?;
		prim.write_i64(w, self.next_pos)?;
		prim.write_i64(w, self.prev_pos)?;
		prim.write_i64(w, self.medium_next_pos)?;
		prim.write_i64(w, self.medium_prev_pos)?;
		prim.write_i64(w, self.long_next_pos)?;
		prim.write_i64(w, self.long_prev_pos)?;
		Ok(())
	}

	pub fn contains_frame(&self, f: i64) -> bool {
		f >= self.first_frame && f < self.first_frame + self.frame_count
	}
}

/// An in-memory frame set: its header plus the mappings and data blocks that
/// belong to it (spec §3 "Frame set").
#[derive(Debug, Clone)]
pub struct FrameSet {
	pub header: FrameSetHeader,
	pub mappings: Vec<ParticleMapping>,
	pub blocks: Vec<DataBlock>,
}

impl FrameSet {
	pub fn new(first_frame: i64, frame_count: i64, first_frame_time: f64) -> Self {
		Self {
			header: FrameSetHeader {
				first_frame,
				frame_count,
				first_frame_time,
				frames_written: 0,
				this_pos: NONE_POINTER,
				next_pos: NONE_POINTER,
				prev_pos: NONE_POINTER,
				medium_next_pos: NONE_POINTER,
				medium_prev_pos: NONE_POINTER,
				long_next_pos: NONE_POINTER,
				long_prev_pos: NONE_POINTER,
			},
			mappings: Vec::new(),
			blocks: Vec::new(),
		}
	}

	pub fn find_block(&self, id: i64) -> Option<&DataBlock> {
		self.blocks.iter().find(|b| b.id == id)
	}

	pub fn find_block_mut(&mut self, id: i64) -> Option<&mut DataBlock> {
		self.blocks.iter_mut().find(|b| b.id == id)
	}

	/// Verifies §3's invariant for every frame-dependent block in this set.
	pub fn check_stored_frame_invariant(&self) -> Result<()> {
		for block in &self.blocks {
			if !block.is_frame_dependent() {
				continue;
			}
			let expected = block.expected_stored_frames(self.header.frame_count);
			if block.n_frames != expected {
				return Err(Error::FormatViolation(format!(
					"block {:#x} has {} stored frames, expected {expected} for frame_count={} stride={}",
					block.id, block.n_frames, self.header.frame_count, block.stride
				)));
			}
		}
		Ok(())
	}
}

/// Stride register: the medium/long stride lengths needed to walk the skip
/// list (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct StrideConfig {
	pub medium_stride: i64,
	pub long_stride: i64,
}

/// Backing store the seek walk reads frame-set headers from, so the walking
/// logic in this module stays I/O-agnostic and unit-testable.
pub trait HeaderSource {
	fn header_at(&mut self, pos: i64) -> Result<FrameSetHeader>;
}

/// Seeks to the `n`-th frame set (0-based ordinal), starting from
/// `first_pos` (spec §4.5 "Seeking by ordinal n"): follow the long pointer
/// while `remaining >= long_stride`, then medium while
/// `remaining >= medium_stride`, then next.
pub fn seek_ordinal<S: HeaderSource>(source: &mut S, first_pos: i64, cfg: StrideConfig, n: i64) -> Result<FrameSetHeader> {
	if first_pos == NONE_POINTER {
		return Err(Error::NotFound("no frame sets in trajectory".into()));
	}
	let mut header = source.header_at(first_pos)?;
	let mut remaining = n;

	while cfg.long_stride > 0 && remaining >= cfg.long_stride && header.long_next_pos != NONE_POINTER {
		header = source.header_at(header.long_next_pos)?;
		remaining -= cfg.long_stride;
	}
	while cfg.medium_stride > 0 && remaining >= cfg.medium_stride && header.medium_next_pos != NONE_POINTER {
		header = source.header_at(header.medium_next_pos)?;
		remaining -= cfg.medium_stride;
	}
	while remaining > 0 {
		if header.next_pos == NONE_POINTER {
			return Err(Error::NotFound(format!("frame set ordinal {n} out of range")));
		}
		header = source.header_at(header.next_pos)?;
		remaining -= 1;
	}
	Ok(header)
}

/// Seeks to the frame set containing absolute frame number `f` (spec §4.5
/// "Seeking by frame number proceeds identically against the per-frame-set
/// first-frame field").
pub fn seek_frame<S: HeaderSource>(source: &mut S, first_pos: i64, cfg: StrideConfig, f: i64) -> Result<FrameSetHeader> {
	if first_pos == NONE_POINTER {
		return Err(Error::NotFound("no frame sets in trajectory".into()));
	}
	let mut header = source.header_at(first_pos)?;
	if header.contains_frame(f) {
		return Ok(header);
	}
	if f < header.first_frame {
		return Err(Error::NotFound(format!("frame {f} precedes the first frame set")));
	}

	loop {
		if let Some(candidate) = peek(source, header.long_next_pos)? {
			if candidate.first_frame <= f {
				header = candidate;
				if header.contains_frame(f) {
					return Ok(header);
				}
				continue;
			}
		}
		if let Some(candidate) = peek(source, header.medium_next_pos)? {
			if candidate.first_frame <= f {
				header = candidate;
				if header.contains_frame(f) {
					return Ok(header);
				}
				continue;
			}
		}
		if header.next_pos == NONE_POINTER {
			return Err(Error::NotFound(format!("frame {f} not found")));
		}
		header = source.header_at(header.next_pos)?;
		if header.contains_frame(f) {
			return Ok(header);
		}
		if header.first_frame > f {
			return Err(Error::NotFound(format!("frame {f} not found")));
		}
	}
}

fn peek<S: HeaderSource>(source: &mut S, pos: i64) -> Result<Option<FrameSetHeader>> {
	if pos == NONE_POINTER {
		Ok(None)
	} else {
		Ok(Some(source.header_at(pos)?))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	struct FakeSource {
		headers: HashMap<i64, FrameSetHeader>,
	}

	impl HeaderSource for FakeSource {
		fn header_at(&mut self, pos: i64) -> Result<FrameSetHeader> {
			self.headers
				.get(&pos)
				.cloned()
				.ok_or_else(|| Error::NotFound(format!("no header at {pos}")))
		}
	}

	/// Builds 5 frame sets of 10 frames each at positions 0..4 with medium
	/// stride 2 (spec §8 scenario 4): each set's `medium_next_pos` skips
	/// ahead two sets when one exists that far ahead.
	fn five_sets_medium_2() -> (FakeSource, i64) {
		let mut headers = HashMap::new();
		for i in 0..5i64 {
			let h = FrameSetHeader {
				first_frame: i * 10,
				frame_count: 10,
				first_frame_time: i as f64,
				frames_written: 10,
				this_pos: i,
				next_pos: if i < 4 { i + 1 } else { NONE_POINTER },
				prev_pos: if i > 0 { i - 1 } else { NONE_POINTER },
				medium_next_pos: if i + 2 <= 4 { i + 2 } else { NONE_POINTER },
				medium_prev_pos: if i >= 2 { i - 2 } else { NONE_POINTER },
				long_next_pos: NONE_POINTER,
				long_prev_pos: NONE_POINTER,
			};
			headers.insert(i, h);
		}
		(FakeSource { headers }, 0)
	}

	#[test]
	fn frame_set_of_frame_find_reaches_fourth_set_within_pointer_budget() {
		let (mut src, first) = five_sets_medium_2();
		let cfg = StrideConfig {
			medium_stride: 2,
			long_stride: i64::MAX,
		};
		let header = seek_frame(&mut src, first, cfg, 35).unwrap();
		assert_eq!(header.this_pos, 3);
		assert!(header.contains_frame(35));
	}

	#[test]
	fn seek_ordinal_walks_next_when_no_skip_available() {
		let (mut src, first) = five_sets_medium_2();
		let cfg = StrideConfig {
			medium_stride: i64::MAX,
			long_stride: i64::MAX,
		};
		let header = seek_ordinal(&mut src, first, cfg, 3).unwrap();
		assert_eq!(header.this_pos, 3);
	}

	#[test]
	fn seek_ordinal_uses_medium_skip() {
		let (mut src, first) = five_sets_medium_2();
		let cfg = StrideConfig {
			medium_stride: 2,
			long_stride: i64::MAX,
		};
		let header = seek_ordinal(&mut src, first, cfg, 4).unwrap();
		assert_eq!(header.this_pos, 4);
	}

	#[test]
	fn seek_frame_not_found_is_recoverable() {
		let (mut src, first) = five_sets_medium_2();
		let cfg = StrideConfig {
			medium_stride: 2,
			long_stride: i64::MAX,
		};
		let err = seek_frame(&mut src, first, cfg, 999).unwrap_err();
		assert_eq!(err.status(), crate::error::Status::Recoverable);
	}
}
