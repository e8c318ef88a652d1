//! Per-block data layout, typed storage, stride semantics and codec
//! dispatch (spec §4.7).
//!
//! On-disk body (non-particle):
//! ```text
//! u8 datatype | u8 dependency | u8 sparse
//! [if frame-dependent: i64 first_frame | i64 n_frames | i64 stride]
//! i64 values_per_frame | i64 codec_id | f64 codec_multiplier
//! payload
//! ```
//! Particle blocks insert `i64 first_particle | i64 n_particles` before the
//! payload.

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::codec::{CodecRegistry, CodecShape};
use crate::endian::Primitives;
use crate::error::{Error, Result};
use crate::value::DataType;

bitflags! {
	/// Dependency flags marking a block as frame- and/or particle-varying
	/// (spec §4.7, `TNG_FRAME_DEPENDENT` / `TNG_PARTICLE_DEPENDENT`).
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct Dependency: u8 {
		const FRAME = 0b01;
		const PARTICLE = 0b10;
	}
}

/// A flattened row-major buffer, one variant per [`DataType`] (spec §3
/// "Payload layout"). Shape is tracked separately on [`DataBlock`]; strings
/// are length-prefixed on disk when the datatype is `Char` (spec §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
	Char(Vec<String>),
	Int(Vec<i64>),
	Float(Vec<f32>),
	Double(Vec<f64>),
}

impl TypedBuffer {
	pub fn datatype(&self) -> DataType {
		match self {
			TypedBuffer::Char(_) => DataType::Char,
			TypedBuffer::Int(_) => DataType::Int,
			TypedBuffer::Float(_) => DataType::Float,
			TypedBuffer::Double(_) => DataType::Double,
		}
	}

	pub fn len(&self) -> usize {
		match self {
			TypedBuffer::Char(v) => v.len(),
			TypedBuffer::Int(v) => v.len(),
			TypedBuffer::Float(v) => v.len(),
			TypedBuffer::Double(v) => v.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn empty(datatype: DataType) -> Self {
		match datatype {
			DataType::Char => TypedBuffer::Char(Vec::new()),
			DataType::Int => TypedBuffer::Int(Vec::new()),
			DataType::Float => TypedBuffer::Float(Vec::new()),
			DataType::Double => TypedBuffer::Double(Vec::new()),
		}
	}

	/// Serializes the buffer into a raw typed byte stream, the same layout
	/// used for uncompressed on-disk storage and as the input to a codec.
	pub fn to_raw_bytes(&self, prim: &Primitives) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		match self {
			TypedBuffer::Char(v) => {
				for s in v {
					prim.write_string(&mut out, s)?;
				}
			}
			TypedBuffer::Int(v) => {
				for &x in v {
					prim.write_i64(&mut out, x)?;
				}
			}
			TypedBuffer::Float(v) => {
				for &x in v {
					prim.write_f32(&mut out, x)?;
				}
			}
			TypedBuffer::Double(v) => {
				for &x in v {
					prim.write_f64(&mut out, x)?;
				}
			}
		}
		Ok(out)
	}

	/// Reverses [`TypedBuffer::to_raw_bytes`], given the element count.
	pub fn from_raw_bytes(datatype: DataType, count: usize, bytes: &[u8], prim: &Primitives) -> Result<Self> {
		let mut r = bytes;
		Ok(match datatype {
			DataType::Char => {
				let mut v = Vec::with_capacity(count);
				for _ in 0..count {
					let (s, _) = prim.read_string(&mut r)?;
					v.push(s);
				}
				TypedBuffer::Char(v)
			}
			DataType::Int => {
				let mut v = Vec::with_capacity(count);
				for _ in 0..count {
					v.push(prim.read_i64(&mut r)?);
				}
				TypedBuffer::Int(v)
			}
			DataType::Float => {
				let mut v = Vec::with_capacity(count);
				for _ in 0..count {
					v.push(prim.read_f32(&mut r)?);
				}
				TypedBuffer::Float(v)
			}
			DataType::Double => {
				let mut v = Vec::with_capacity(count);
				for _ in 0..count {
					v.push(prim.read_f64(&mut r)?);
				}
				TypedBuffer::Double(v)
			}
		})
	}

	pub fn as_f64(&self, index: usize) -> f64 {
		match self {
			TypedBuffer::Char(_) => 0.0,
			TypedBuffer::Int(v) => v[index] as f64,
			TypedBuffer::Float(v) => v[index] as f64,
			TypedBuffer::Double(v) => v[index],
		}
	}

	pub fn extend_from(&mut self, other: &TypedBuffer) -> Result<()> {
		match (self, other) {
			(TypedBuffer::Char(a), TypedBuffer::Char(b)) => a.extend(b.iter().cloned()),
			(TypedBuffer::Int(a), TypedBuffer::Int(b)) => a.extend_from_slice(b),
			(TypedBuffer::Float(a), TypedBuffer::Float(b)) => a.extend_from_slice(b),
			(TypedBuffer::Double(a), TypedBuffer::Double(b)) => a.extend_from_slice(b),
			_ => return Err(Error::FormatViolation("datatype mismatch joining frame data".into())),
		}
		Ok(())
	}

	/// Appends `len` elements of `src` starting at `start` (used to permute a
	/// particle-dependent block's storage order, spec §4.6).
	pub fn append_slice_from(&mut self, src: &TypedBuffer, start: usize, len: usize) -> Result<()> {
		match (self, src) {
			(TypedBuffer::Char(a), TypedBuffer::Char(b)) => a.extend_from_slice(&b[start..start + len]),
			(TypedBuffer::Int(a), TypedBuffer::Int(b)) => a.extend_from_slice(&b[start..start + len]),
			(TypedBuffer::Float(a), TypedBuffer::Float(b)) => a.extend_from_slice(&b[start..start + len]),
			(TypedBuffer::Double(a), TypedBuffer::Double(b)) => a.extend_from_slice(&b[start..start + len]),
			_ => return Err(Error::FormatViolation("datatype mismatch permuting particle data".into())),
		}
		Ok(())
	}
}

/// A data block descriptor and its resident payload (spec §3 "Data block",
/// §4.7).
#[derive(Debug, Clone)]
pub struct DataBlock {
	pub id: i64,
	pub name: String,
	pub datatype: DataType,
	pub dependency: Dependency,
	pub codec_id: i64,
	pub codec_multiplier: f64,
	pub sparse: bool,
	/// Frames between stored samples; meaningful only when
	/// `dependency.contains(Dependency::FRAME)`.
	pub stride: i64,
	pub n_values_per_frame: i64,
	pub first_frame_number: i64,
	/// Number of frames actually stored (`ceil(frame_count / stride)` for a
	/// full frame set, spec §3 invariant).
	pub n_frames: i64,
	pub first_particle_number: Option<u64>,
	pub particle_count: Option<u64>,
	pub values: TypedBuffer,
}

impl DataBlock {
	pub fn is_frame_dependent(&self) -> bool {
		self.dependency.contains(Dependency::FRAME)
	}

	pub fn is_particle_dependent(&self) -> bool {
		self.dependency.contains(Dependency::PARTICLE)
	}

	pub fn new_non_particle(id: i64, name: impl Into<String>, datatype: DataType, n_values_per_frame: i64, stride: i64, codec_id: i64) -> Self {
		Self {
			id,
			name: name.into(),
			datatype,
			dependency: Dependency::FRAME,
			codec_id,
			codec_multiplier: 1.0,
			sparse: false,
			stride: stride.max(1),
			n_values_per_frame,
			first_frame_number: 0,
			n_frames: 0,
			first_particle_number: None,
			particle_count: None,
			values: TypedBuffer::empty(datatype),
		}
	}

	pub fn new_particle(
		id: i64,
		name: impl Into<String>,
		datatype: DataType,
		n_values_per_frame: i64,
		stride: i64,
		codec_id: i64,
		first_particle_number: u64,
		particle_count: u64,
	) -> Self {
		let mut block = Self::new_non_particle(id, name, datatype, n_values_per_frame, stride, codec_id);
		block.dependency |= Dependency::PARTICLE;
		block.first_particle_number = Some(first_particle_number);
		block.particle_count = Some(particle_count);
		block
	}

	/// Number of frame slots in this frame set that a fully-populated block
	/// of this stride would occupy (spec §3 invariant).
	pub fn expected_stored_frames(&self, frame_set_frame_count: i64) -> i64 {
		if !self.is_frame_dependent() {
			return 1;
		}
		(frame_set_frame_count + self.stride - 1) / self.stride
	}

	/// `true` iff frame `f` (absolute frame number) is materialised by this
	/// block (spec §4.7 "Stride semantics").
	pub fn frame_present(&self, f: i64) -> bool {
		if !self.is_frame_dependent() {
			return true;
		}
		let last = self.first_frame_number + self.stride * self.n_frames;
		f >= self.first_frame_number && f < last && (f - self.first_frame_number) % self.stride == 0
	}

	/// For a requested frame that isn't stored, the nearest stored frame and
	/// the stride, so the caller can align (spec §4.7).
	pub fn nearest_stored_frame(&self, f: i64) -> (i64, i64) {
		if !self.is_frame_dependent() {
			return (f, 1);
		}
		let steps = (f - self.first_frame_number).div_euclid(self.stride);
		let nearest = self.first_frame_number + steps * self.stride;
		(nearest, self.stride)
	}

	fn particle_slots(&self) -> usize {
		self.particle_count.unwrap_or(1) as usize
	}

	/// Row-major element index of `(frame_slot, particle_local, value_idx)`.
	fn element_index(&self, frame_slot: usize, particle_local: usize, value_idx: usize) -> usize {
		(frame_slot * self.particle_slots() + particle_local) * self.n_values_per_frame as usize + value_idx
	}

	/// Deposits one frame's worth of values at the given frame slot,
	/// growing storage lazily (spec §4.7 "Buffered writes", §4.9
	/// `frame_data_write`/`frame_particle_data_write`).
	pub fn write_frame_slot(&mut self, frame_slot: usize, values: &TypedBuffer) -> Result<()> {
		let expected_len = self.particle_slots() * self.n_values_per_frame as usize;
		if values.len() != expected_len {
			return Err(Error::FormatViolation(format!(
				"frame write for block {:#x} expected {expected_len} values, got {}",
				self.id,
				values.len()
			)));
		}
		let needed_frames = frame_slot + 1;
		if (self.n_frames as usize) < needed_frames {
			self.grow_to(needed_frames)?;
		}
		let start = self.element_index(frame_slot, 0, 0);
		match (&mut self.values, values) {
			(TypedBuffer::Char(dst), TypedBuffer::Char(src)) => dst[start..start + expected_len].clone_from_slice(src),
			(TypedBuffer::Int(dst), TypedBuffer::Int(src)) => dst[start..start + expected_len].copy_from_slice(src),
			(TypedBuffer::Float(dst), TypedBuffer::Float(src)) => dst[start..start + expected_len].copy_from_slice(src),
			(TypedBuffer::Double(dst), TypedBuffer::Double(src)) => dst[start..start + expected_len].copy_from_slice(src),
			_ => return Err(Error::FormatViolation("datatype mismatch on frame write".into())),
		}
		Ok(())
	}

	fn grow_to(&mut self, frames: usize) -> Result<()> {
		let per_frame = self.particle_slots() * self.n_values_per_frame as usize;
		let total = frames * per_frame;
		match &mut self.values {
			TypedBuffer::Char(v) => v.resize(total, String::new()),
			TypedBuffer::Int(v) => v.resize(total, 0),
			TypedBuffer::Float(v) => v.resize(total, 0.0),
			TypedBuffer::Double(v) => v.resize(total, 0.0),
		}
		self.n_frames = frames as i64;
		Ok(())
	}

	fn codec_shape(&self) -> CodecShape {
		CodecShape {
			n_frames: self.n_frames.max(0) as usize,
			n_particles: self.particle_count.map(|c| c as usize),
			n_values_per_frame: self.n_values_per_frame as usize,
			datatype: self.datatype,
		}
	}

	/// Writes this block's body (spec §4.7 body layouts). Compression is
	/// applied here, at flush time, matching "Buffered writes" in §4.7.
	pub fn write_body<W: Write>(&self, w: &mut W, prim: &Primitives, codecs: &CodecRegistry) -> Result<()> {
		w.write_all(&[self.datatype.tag()])?;
		w.write_all(&[self.dependency.bits()])?;
		w.write_all(&[self.sparse as u8])?;

		if self.is_frame_dependent() {
			prim.write_i64(w, self.first_frame_number)?;
			prim.write_i64(w, self.n_frames)?;
			prim.write_i64(w, self.stride)?;
		}
		prim.write_i64(w, self.n_values_per_frame)?;

		let raw = self.values.to_raw_bytes(prim)?;
		let (payload, multiplier) = if self.codec_id == 0 {
			(raw, self.codec_multiplier)
		} else {
			let (codec, _known) = codecs.resolve(self.codec_id);
			codec
				.encode(self.codec_shape(), self.codec_multiplier, &raw)
				.map_err(Error::Io)?
		};

		prim.write_i64(w, self.codec_id)?;
		prim.write_f64(w, multiplier)?;

		if self.is_particle_dependent() {
			prim.write_i64(w, self.first_particle_number.unwrap_or(0) as i64)?;
			prim.write_i64(w, self.particle_count.unwrap_or(0) as i64)?;
		}

		w.write_all(&payload)?;
		Ok(())
	}

	/// Reads a block body of `body_len` bytes (spec §4.7). `name`/`id` come
	/// from the already-parsed common header.
	pub fn read_body<R: Read>(
		r: &mut R,
		prim: &Primitives,
		codecs: &CodecRegistry,
		id: i64,
		name: String,
		body_len: usize,
	) -> Result<Self> {
		let mut consumed = 0usize;
		let mut datatype_tag = [0u8; 1];
		r.read_exact(&mut datatype_tag)?;
		let datatype = DataType::from_tag(datatype_tag[0])?;
		consumed += 1;
		let mut flags = [0u8; 1];
		r.read_exact(&mut flags)?;
		consumed += 1;
		let dependency = Dependency::from_bits_truncate(flags[0]);
		let mut sparse = [0u8; 1];
		r.read_exact(&mut sparse)?;
		consumed += 1;
		let sparse = sparse[0] != 0;

		let (first_frame_number, n_frames, stride) = if dependency.contains(Dependency::FRAME) {
			let f = prim.read_i64(r)?;
			let n = prim.read_i64(r)?;
			let s = prim.read_i64(r)?;
			consumed += 24;
			(f, n, s.max(1))
		} else {
			(0, 1, 1)
		};

		let n_values_per_frame = prim.read_i64(r)?;
		consumed += 8;

		let codec_id = prim.read_i64(r)?;
		consumed += 8;
		let codec_multiplier = prim.read_f64(r)?;
		consumed += 8;

		let (first_particle_number, particle_count) = if dependency.contains(Dependency::PARTICLE) {
			let fp = prim.read_i64(r)? as u64;
			let np = prim.read_i64(r)? as u64;
			consumed += 16;
			(Some(fp), Some(np))
		} else {
			(None, None)
		};

		if body_len < consumed {
			return Err(Error::FormatViolation(format!(
				"data block {id:#x} body shorter than its own fixed header"
			)));
		}
		let payload_len = body_len - consumed;
		let payload = crate::endian::read_exact_vec(r, payload_len)?;

		let n_particles = particle_count.unwrap_or(1) as usize;
		let count = (n_frames.max(0) as usize)
			.checked_mul(n_particles)
			.and_then(|v| v.checked_mul(n_values_per_frame.max(0) as usize))
			.ok_or_else(|| Error::FormatViolation(format!("data block {id:#x} declares an element count that overflows")))?;

		let shape = CodecShape {
			n_frames: n_frames.max(0) as usize,
			n_particles: particle_count.map(|c| c as usize),
			n_values_per_frame: n_values_per_frame.max(0) as usize,
			datatype,
		};

		let raw = if codec_id == 0 {
			payload
		} else {
			let (codec, known) = codecs.resolve(codec_id);
			if known {
				codec.decode(shape, codec_multiplier, &payload).map_err(Error::Io)?
			} else {
				payload
			}
		};

		// `count` comes straight from on-disk header fields; bound it against
		// the actual (post-codec) payload before handing it to `Vec::with_capacity`
		// so a malformed header is a format violation, not an OOM/capacity panic.
		let min_element_size = match datatype {
			DataType::Char => 4, // u32 length prefix at minimum
			DataType::Int | DataType::Double => 8,
			DataType::Float => 4,
		};
		let required = count
			.checked_mul(min_element_size)
			.ok_or_else(|| Error::FormatViolation(format!("data block {id:#x} declares an element count that overflows")))?;
		if raw.len() < required {
			return Err(Error::FormatViolation(format!(
				"data block {id:#x} declares {count} {datatype:?} elements but its payload is only {} bytes",
				raw.len()
			)));
		}

		let values = TypedBuffer::from_raw_bytes(datatype, count, &raw, prim)?;

		Ok(Self {
			id,
			name,
			datatype,
			dependency,
			codec_id,
			codec_multiplier,
			sparse,
			stride,
			n_values_per_frame,
			first_frame_number,
			n_frames,
			first_particle_number,
			particle_count,
			values,
		})
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::endian::FileEndianness;

	#[test]
	fn stride_presence_matches_spec() {
		let mut block = DataBlock::new_non_particle(1, "vel", DataType::Float, 3, 5, 0);
		block.n_frames = 4; // frames 0,5,10,15
		for f in 0..20 {
			assert_eq!(block.frame_present(f), f % 5 == 0);
		}
		let (nearest, stride) = block.nearest_stored_frame(7);
		assert_eq!((nearest, stride), (5, 5));
	}

	#[test]
	fn round_trip_uncompressed_bit_identical() {
		let prim = Primitives::new(FileEndianness::Little);
		let codecs = CodecRegistry::new();
		let mut block = DataBlock::new_particle(1, "pos", DataType::Double, 3, 1, 0, 0, 2);
		block.write_frame_slot(0, &TypedBuffer::Double(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])).unwrap();
		block.write_frame_slot(1, &TypedBuffer::Double(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0])).unwrap();

		let mut buf = Cursor::new(Vec::new());
		block.write_body(&mut buf, &prim, &codecs).unwrap();
		let body_len = buf.position() as usize;
		buf.set_position(0);

		let back = DataBlock::read_body(&mut buf, &prim, &codecs, 1, "pos".into(), body_len).unwrap();
		assert_eq!(back.values, block.values);
		assert_eq!(back.n_frames, 2);
	}
}
