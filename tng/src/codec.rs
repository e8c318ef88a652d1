//! Codec dispatch for data block payloads (spec §4.7, §1).
//!
//! The engine treats every codec beyond "none" as an opaque byte-in/byte-out
//! transform keyed by a codec id; their internal state (lossy position
//! quantization, format-specific tricks, general deflate) is out of scope
//! for this crate (spec §1 "Out of scope") and is supplied by the caller
//! through [`CodecRegistry::register`]. An id with nothing registered falls
//! back to raw storage with a recorded warning, same as an unrecognised id.

use std::collections::HashMap;

use crate::value::DataType;

/// Codec ids the engine recognises (spec §4.7).
pub mod ids {
	pub const NONE: i64 = 0;
	pub const XTC_LOSSY_POSITIONS: i64 = 1;
	pub const FORMAT_SPECIFIC_LOSSY: i64 = 2;
	pub const DEFLATE: i64 = 3;
}

/// Shape metadata handed to a codec alongside the raw buffer (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct CodecShape {
	pub n_frames: usize,
	pub n_particles: Option<usize>,
	pub n_values_per_frame: usize,
	pub datatype: DataType,
}

/// An external, opaque compressor/decompressor for one codec id.
pub trait Codec: Send + Sync {
	/// Encodes a contiguous typed buffer (row-major
	/// `[frames][particles?][values_per_frame]`) plus the write-side
	/// multiplier, returning the compressed bytes and the multiplier that
	/// should be recorded in the block header (the codec may adjust it).
	fn encode(&self, shape: CodecShape, multiplier: f64, raw: &[u8]) -> std::io::Result<(Vec<u8>, f64)>;

	/// Reverses [`Codec::encode`].
	fn decode(&self, shape: CodecShape, multiplier: f64, compressed: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Passthrough codec registered under [`ids::NONE`] and used as the fallback
/// for any id with nothing else registered.
struct NoneCodec;

impl Codec for NoneCodec {
	fn encode(&self, _shape: CodecShape, multiplier: f64, raw: &[u8]) -> std::io::Result<(Vec<u8>, f64)> {
		Ok((raw.to_vec(), multiplier))
	}

	fn decode(&self, _shape: CodecShape, _multiplier: f64, compressed: &[u8]) -> std::io::Result<Vec<u8>> {
		Ok(compressed.to_vec())
	}
}

/// General-purpose deflate codec (spec §1 lists "general deflate" among the
/// out-of-scope codec internals; this is a convenience default registered
/// under [`ids::DEFLATE`] when the `deflate` feature is enabled, not a
/// requirement of the engine — callers remain free to register their own).
#[cfg(feature = "deflate")]
struct DeflateCodec;

#[cfg(feature = "deflate")]
impl Codec for DeflateCodec {
	fn encode(&self, _shape: CodecShape, multiplier: f64, raw: &[u8]) -> std::io::Result<(Vec<u8>, f64)> {
		use std::io::Write;
		let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
		enc.write_all(raw)?;
		Ok((enc.finish()?, multiplier))
	}

	fn decode(&self, _shape: CodecShape, _multiplier: f64, compressed: &[u8]) -> std::io::Result<Vec<u8>> {
		use std::io::Read;
		let mut dec = flate2::read::DeflateDecoder::new(compressed);
		let mut out = Vec::new();
		dec.read_to_end(&mut out)?;
		Ok(out)
	}
}

/// Maps codec ids to registered [`Codec`] implementations (spec §4.7
/// "Codec dispatch"). The engine is not required to know internal codec
/// state; it only hands codecs a buffer and shape metadata.
pub struct CodecRegistry {
	codecs: HashMap<i64, Box<dyn Codec>>,
}

impl Default for CodecRegistry {
	fn default() -> Self {
		let mut codecs: HashMap<i64, Box<dyn Codec>> = HashMap::new();
		codecs.insert(ids::NONE, Box::new(NoneCodec));
		#[cfg(feature = "deflate")]
		codecs.insert(ids::DEFLATE, Box::new(DeflateCodec));
		Self { codecs }
	}
}

impl CodecRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers (or replaces) the codec for `id`. Lets a caller supply the
	/// real XTC-style or format-specific implementations this crate does
	/// not carry.
	pub fn register(&mut self, id: i64, codec: Box<dyn Codec>) {
		self.codecs.insert(id, codec);
	}

	/// Looks up the codec for `id`, falling back to [`ids::NONE`] and
	/// logging a non-critical warning when nothing is registered for a
	/// non-zero id (spec §4.7: "Unknown ids fall back to raw storage with a
	/// non-critical warning recorded").
	pub fn resolve(&self, id: i64) -> (&dyn Codec, bool) {
		match self.codecs.get(&id) {
			Some(codec) => (codec.as_ref(), true),
			None => {
				log::warn!("codec id {id} has no registered implementation; storing raw");
				(self.codecs.get(&ids::NONE).expect("none codec always registered").as_ref(), false)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn shape() -> CodecShape {
		CodecShape {
			n_frames: 2,
			n_particles: Some(3),
			n_values_per_frame: 3,
			datatype: DataType::Float,
		}
	}

	#[test]
	fn none_round_trips() {
		let reg = CodecRegistry::new();
		let (codec, known) = reg.resolve(ids::NONE);
		assert!(known);
		let raw = vec![1u8, 2, 3, 4];
		let (encoded, mult) = codec.encode(shape(), 1.0, &raw).unwrap();
		let decoded = codec.decode(shape(), mult, &encoded).unwrap();
		assert_eq!(decoded, raw);
	}

	#[test]
	fn unknown_codec_falls_back_to_none() {
		let reg = CodecRegistry::new();
		let (_, known) = reg.resolve(42);
		assert!(!known);
	}

	#[cfg(feature = "deflate")]
	#[test]
	fn deflate_round_trips() {
		let reg = CodecRegistry::new();
		let (codec, known) = reg.resolve(ids::DEFLATE);
		assert!(known);
		let raw: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();
		let (encoded, mult) = codec.encode(shape(), 2.0, &raw).unwrap();
		assert!(encoded.len() < raw.len());
		let decoded = codec.decode(shape(), mult, &encoded).unwrap();
		assert_eq!(decoded, raw);
	}
}
