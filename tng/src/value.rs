//! Datatype tags and the deprecated tagged-value accessor (spec §4.7,
//! Design Note 2).
//!
//! The modern surface (`data_block`, `trajectory::util`) hands callers typed
//! vectors directly. This module only exists for the legacy accessor pair
//! that the original API exposed as a `void*` + datatype tag; we keep the
//! shape here so it has exactly one place to live instead of leaking into
//! every block type.

use crate::error::{Error, Result};

/// On-disk value representation (spec §3, §4.7, `tng_data_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
	Char,
	Int,
	Float,
	Double,
}

impl DataType {
	pub fn size(self) -> usize {
		match self {
			DataType::Char => 1,
			DataType::Int => 8,
			DataType::Float => 4,
			DataType::Double => 8,
		}
	}

	pub fn from_tag(tag: u8) -> Result<Self> {
		match tag {
			0 => Ok(DataType::Char),
			1 => Ok(DataType::Int),
			2 => Ok(DataType::Float),
			3 => Ok(DataType::Double),
			other => Err(Error::FormatViolation(format!(
				"unknown data type tag {other}"
			))),
		}
	}

	pub fn tag(self) -> u8 {
		match self {
			DataType::Char => 0,
			DataType::Int => 1,
			DataType::Float => 2,
			DataType::Double => 3,
		}
	}
}

/// Shape of a materialised array: `[frames][particles?][values_per_frame]`
/// (spec §3 "Payload layout", §4.9 `data_vector_get`: "returning
/// `{n_frames, stride, n_particles?, n_values_per_frame, datatype}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
	pub n_frames: usize,
	/// Frames between stored samples (spec §4.7 "Stride semantics"); `1` for
	/// a block that isn't frame-dependent.
	pub stride: i64,
	pub n_particles: Option<usize>,
	pub n_values_per_frame: usize,
}

impl Shape {
	pub fn len(&self) -> usize {
		self.n_frames * self.n_particles.unwrap_or(1) * self.n_values_per_frame
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A tagged value cell, kept only for the deprecated legacy accessor pair
/// (spec Design Note 2). New code should use the typed vectors the modern
/// surface returns instead.
#[derive(Debug, Clone, PartialEq)]
#[deprecated(note = "use the typed data_block/util accessors instead")]
pub enum LegacyValue {
	Char(Vec<u8>),
	Int(i64),
	Float(f32),
	Double(f64),
}

#[allow(deprecated)]
impl LegacyValue {
	pub fn datatype(&self) -> DataType {
		match self {
			LegacyValue::Char(_) => DataType::Char,
			LegacyValue::Int(_) => DataType::Int,
			LegacyValue::Float(_) => DataType::Float,
			LegacyValue::Double(_) => DataType::Double,
		}
	}
}
