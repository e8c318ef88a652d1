//! Local↔global particle id remapping within a frame set (spec §4.6).

use std::io::{Read, Write};

use crate::endian::Primitives;
use crate::error::{Error, Result};

/// Maps each local index in `first_particle_number .. first_particle_number +
/// global_ids.len()` to the real particle id `global_ids[local_index -
/// first_particle_number]`.
///
/// This is a dense table rather than a contiguous offset, so a producer can
/// own a non-contiguous subset of the system's particles (spec §3: "a dense
/// table `local_index → global_particle_id`"; `tng_particle_mapping_add` in
/// `examples/original_source/include/tng_io.h` takes an arbitrary
/// `mapping_table`, not just a base offset). Multiple mappings in one frame
/// set partition the local particle range among producers and must be
/// disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleMapping {
	pub first_particle_number: u64,
	pub global_ids: Vec<u64>,
}

impl ParticleMapping {
	pub fn new(first_particle_number: u64, global_ids: Vec<u64>) -> Self {
		Self {
			first_particle_number,
			global_ids,
		}
	}

	/// Convenience constructor for the common contiguous case, where local
	/// index `i` maps to global id `first_particle_number + i`.
	pub fn identity(first_particle_number: u64, count: u64) -> Self {
		Self::new(first_particle_number, (first_particle_number..first_particle_number + count).collect())
	}

	pub fn count(&self) -> u64 {
		self.global_ids.len() as u64
	}

	pub fn local_range(&self) -> std::ops::Range<u64> {
		self.first_particle_number..(self.first_particle_number + self.count())
	}

	/// Local→global lookup; `None` if `local_index` is outside this mapping.
	pub fn global(&self, local_index: u64) -> Option<u64> {
		let offset = local_index.checked_sub(self.first_particle_number)?;
		self.global_ids.get(offset as usize).copied()
	}

	pub fn read<R: Read>(r: &mut R, prim: &Primitives, body_len: usize) -> Result<Self> {
		let first_particle_number = prim.read_i64(r)? as u64;
		let count = prim.read_i64(r)? as u64;

		let header_len = 16usize;
		if body_len < header_len {
			return Err(Error::FormatViolation("particle mapping body shorter than its own fixed header".into()));
		}
		let remaining = body_len - header_len;
		let required = (count as usize)
			.checked_mul(8)
			.ok_or_else(|| Error::FormatViolation("particle mapping declares a table size that overflows".into()))?;
		if required > remaining {
			return Err(Error::FormatViolation(format!(
				"particle mapping declares {count} entries but its body has only {remaining} bytes left"
			)));
		}

		let mut global_ids = Vec::with_capacity(count as usize);
		for _ in 0..count {
			global_ids.push(prim.read_i64(r)? as u64);
		}
		Ok(Self {
			first_particle_number,
			global_ids,
		})
	}

	pub fn write<W: Write>(&self, w: &mut W, prim: &Primitives) -> Result<()> {
		prim.write_i64(w, self.first_particle_number as i64)?;
		prim.write_i64(w, self.count() as i64)?;
		for &id in &self.global_ids {
			prim.write_i64(w, id as i64)?;
		}
		Ok(())
	}
}

/// Checks that a set of mappings belonging to one frame set are pairwise
/// disjoint over the *local* particle range they own; overlap is a critical
/// format violation (spec §4.6).
pub fn check_disjoint(mappings: &[ParticleMapping]) -> Result<()> {
	for (i, a) in mappings.iter().enumerate() {
		for b in &mappings[i + 1..] {
			let ar = a.local_range();
			let br = b.local_range();
			if ar.start < br.end && br.start < ar.end {
				return Err(Error::FormatViolation(format!(
					"particle mappings overlap: local [{}, {}) and [{}, {})",
					ar.start, ar.end, br.start, br.end
				)));
			}
		}
	}
	Ok(())
}

/// Resolves the mapping owning local particle index `local_id`, by linear
/// scan (spec §4.6: "the engine resolves the mapping by linear scan").
pub fn find_owning(mappings: &[ParticleMapping], local_id: u64) -> Result<&ParticleMapping> {
	mappings
		.iter()
		.find(|m| m.local_range().contains(&local_id))
		.ok_or_else(|| Error::NotFound(format!("no mapping covers local particle {local_id}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disjoint_mappings_pass() {
		let m = vec![ParticleMapping::identity(0, 50), ParticleMapping::identity(50, 50)];
		check_disjoint(&m).unwrap();
	}

	#[test]
	fn overlapping_mappings_are_critical() {
		let m = vec![ParticleMapping::identity(0, 51), ParticleMapping::identity(50, 50)];
		assert!(check_disjoint(&m).is_err());
	}

	#[test]
	fn closure_covers_every_particle() {
		let m = vec![ParticleMapping::identity(0, 50), ParticleMapping::identity(50, 50)];
		for id in 0..100 {
			assert!(find_owning(&m, id).is_ok());
		}
		assert!(find_owning(&m, 100).is_err());
	}

	#[test]
	fn non_contiguous_table_resolves_real_ids() {
		// A producer can own local indices [0, 3) while their real particle
		// ids are scattered rather than a contiguous run.
		let m = ParticleMapping::new(0, vec![7, 2, 9]);
		assert_eq!(m.global(0), Some(7));
		assert_eq!(m.global(1), Some(2));
		assert_eq!(m.global(2), Some(9));
		assert_eq!(m.global(3), None);
	}
}
