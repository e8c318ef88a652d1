//! Topology model and its `MOLECULES` block serialization (spec §3, §4.4).
//!
//! Parent back-references (atom → residue, residue → chain) are plain
//! indices into the enclosing molecule's flat vectors, never owning
//! pointers — this keeps the model acyclic while still giving O(1)
//! navigation (spec Design Note 1).

use std::io::{Read, Write};

use crate::endian::Primitives;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
	pub id: i64,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residue {
	pub id: i64,
	pub name: String,
	/// Index into the owning [`Molecule::chains`].
	pub chain_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
	pub id: i64,
	pub name: String,
	pub atom_type: String,
	/// Index into the owning [`Molecule::residues`].
	pub residue_index: usize,
	/// Index into the owning [`Molecule::chains`].
	pub chain_index: usize,
}

/// A bond between two atoms, referenced by index into [`Molecule::atoms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
	pub atom_a: usize,
	pub atom_b: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Molecule {
	pub id: i64,
	pub name: String,
	/// Number of instances of this molecule in the system (the "quaternary
	/// structure count" in the original format).
	pub instance_count: u64,
	pub chains: Vec<Chain>,
	pub residues: Vec<Residue>,
	pub atoms: Vec<Atom>,
	pub bonds: Vec<Bond>,
}

impl Molecule {
	pub fn new(id: i64, name: impl Into<String>) -> Self {
		Self {
			id,
			name: name.into(),
			instance_count: 1,
			chains: Vec::new(),
			residues: Vec::new(),
			atoms: Vec::new(),
			bonds: Vec::new(),
		}
	}

	pub fn add_chain(&mut self, id: i64, name: impl Into<String>) -> usize {
		self.chains.push(Chain {
			id,
			name: name.into(),
		});
		self.chains.len() - 1
	}

	pub fn add_residue(&mut self, id: i64, name: impl Into<String>, chain_index: usize) -> usize {
		self.residues.push(Residue {
			id,
			name: name.into(),
			chain_index,
		});
		self.residues.len() - 1
	}

	pub fn add_atom(
		&mut self,
		id: i64,
		name: impl Into<String>,
		atom_type: impl Into<String>,
		residue_index: usize,
	) -> Result<usize> {
		let chain_index = self
			.residues
			.get(residue_index)
			.ok_or_else(|| Error::NotFound(format!("residue index {residue_index}")))?
			.chain_index;
		self.atoms.push(Atom {
			id,
			name: name.into(),
			atom_type: atom_type.into(),
			residue_index,
			chain_index,
		});
		Ok(self.atoms.len() - 1)
	}

	pub fn add_bond(&mut self, atom_a: usize, atom_b: usize) -> Result<()> {
		if atom_a >= self.atoms.len() || atom_b >= self.atoms.len() {
			return Err(Error::NotFound(format!(
				"bond references atom index out of range ({atom_a}, {atom_b})"
			)));
		}
		self.bonds.push(Bond { atom_a, atom_b });
		Ok(())
	}

	fn find<'a, T>(items: &'a [T], name: Option<&str>, id: Option<i64>, get: impl Fn(&T) -> (i64, &str)) -> Option<&'a T> {
		items.iter().find(|item| {
			let (item_id, item_name) = get(item);
			let name_ok = name.map_or(true, |n| n.is_empty() || n == item_name);
			let id_ok = id.map_or(true, |i| i == -1 || i == item_id);
			name_ok && id_ok
		})
	}

	pub fn find_chain(&self, name: Option<&str>, id: Option<i64>) -> Option<&Chain> {
		Self::find(&self.chains, name, id, |c| (c.id, c.name.as_str()))
	}

	pub fn find_residue(&self, name: Option<&str>, id: Option<i64>) -> Option<&Residue> {
		Self::find(&self.residues, name, id, |r| (r.id, r.name.as_str()))
	}

	pub fn find_atom(&self, name: Option<&str>, id: Option<i64>) -> Option<&Atom> {
		Self::find(&self.atoms, name, id, |a| (a.id, a.name.as_str()))
	}
}

/// The topology: declaration-ordered molecules plus the global atom-id
/// offsets derived from their instance counts (spec §4.4).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
	pub molecules: Vec<Molecule>,
}

impl Topology {
	pub fn add_molecule(&mut self, mol: Molecule) -> usize {
		self.molecules.push(mol);
		self.molecules.len() - 1
	}

	pub fn find_molecule(&self, name: Option<&str>, id: Option<i64>) -> Option<&Molecule> {
		self.molecules.iter().find(|m| {
			let name_ok = name.map_or(true, |n| n.is_empty() || n == m.name);
			let id_ok = id.map_or(true, |i| i == -1 || i == m.id);
			name_ok && id_ok
		})
	}

	/// Per-instance atom-id offsets: `offset(mol_instance)` in declaration
	/// order, as used by `global_id` (spec §4.4).
	pub fn instance_offsets(&self) -> Vec<u64> {
		let mut offsets = Vec::new();
		let mut next = 0u64;
		for mol in &self.molecules {
			for _ in 0..mol.instance_count {
				offsets.push(next);
				next += mol.atoms.len() as u64;
			}
		}
		offsets
	}

	/// Total number of particles implied by the topology: sum over molecules
	/// of `instance_count * atoms.len()`.
	pub fn num_particles(&self) -> u64 {
		self.molecules
			.iter()
			.map(|m| m.instance_count * m.atoms.len() as u64)
			.sum()
	}

	pub fn read<R: Read>(r: &mut R, prim: &Primitives) -> Result<Self> {
		let n_molecules = prim.read_i64(r)? as usize;
		let mut molecules = Vec::with_capacity(n_molecules);
		for _ in 0..n_molecules {
			let id = prim.read_i64(r)?;
			let (name, _) = prim.read_string(r)?;
			let instance_count = prim.read_i64(r)? as u64;
			let n_chains = prim.read_i64(r)? as usize;
			let n_residues = prim.read_i64(r)? as usize;
			let n_atoms = prim.read_i64(r)? as usize;
			let n_bonds = prim.read_i64(r)? as usize;

			let mut mol = Molecule {
				id,
				name,
				instance_count,
				chains: Vec::with_capacity(n_chains),
				residues: Vec::with_capacity(n_residues),
				atoms: Vec::with_capacity(n_atoms),
				bonds: Vec::with_capacity(n_bonds),
			};

			for _ in 0..n_chains {
				let id = prim.read_i64(r)?;
				let (name, _) = prim.read_string(r)?;
				mol.chains.push(Chain { id, name });
			}
			for _ in 0..n_residues {
				let id = prim.read_i64(r)?;
				let (name, _) = prim.read_string(r)?;
				let chain_index = prim.read_i64(r)? as usize;
				if chain_index >= mol.chains.len() {
					return Err(Error::FormatViolation(format!(
						"residue {id} references out-of-range chain index {chain_index}"
					)));
				}
				mol.residues.push(Residue {
					id,
					name,
					chain_index,
				});
			}
			for _ in 0..n_atoms {
				let id = prim.read_i64(r)?;
				let (name, _) = prim.read_string(r)?;
				let (atom_type, _) = prim.read_string(r)?;
				let residue_index = prim.read_i64(r)? as usize;
				if residue_index >= mol.residues.len() {
					return Err(Error::FormatViolation(format!(
						"atom {id} references out-of-range residue index {residue_index}"
					)));
				}
				let chain_index = mol.residues[residue_index].chain_index;
				mol.atoms.push(Atom {
					id,
					name,
					atom_type,
					residue_index,
					chain_index,
				});
			}
			for _ in 0..n_bonds {
				let atom_a = prim.read_i64(r)? as usize;
				let atom_b = prim.read_i64(r)? as usize;
				if atom_a >= mol.atoms.len() || atom_b >= mol.atoms.len() {
					return Err(Error::FormatViolation(format!(
						"bond references out-of-range atom index ({atom_a}, {atom_b})"
					)));
				}
				mol.bonds.push(Bond { atom_a, atom_b });
			}

			molecules.push(mol);
		}
		Ok(Self { molecules })
	}

	pub fn write<W: Write>(&self, w: &mut W, prim: &Primitives) -> Result<()> {
		prim.write_i64(w, self.molecules.len() as i64)?;
		for mol in &self.molecules {
			prim.write_i64(w, mol.id)?;
			prim.write_string(w, &mol.name)?;
			prim.write_i64(w, mol.instance_count as i64)?;
			prim.write_i64(w, mol.chains.len() as i64)?;
			prim.write_i64(w, mol.residues.len() as i64)?;
			prim.write_i64(w, mol.atoms.len() as i64)?;
			prim.write_i64(w, mol.bonds.len() as i64)?;

			for chain in &mol.chains {
				prim.write_i64(w, chain.id)?;
				prim.write_string(w, &chain.name)?;
			}
			for residue in &mol.residues {
				prim.write_i64(w, residue.id)?;
				prim.write_string(w, &residue.name)?;
				prim.write_i64(w, residue.chain_index as i64)?;
			}
			for atom in &mol.atoms {
				prim.write_i64(w, atom.id)?;
				prim.write_string(w, &atom.name)?;
				prim.write_string(w, &atom.atom_type)?;
				prim.write_i64(w, atom.residue_index as i64)?;
			}
			for bond in &mol.bonds {
				prim.write_i64(w, bond.atom_a as i64)?;
				prim.write_i64(w, bond.atom_b as i64)?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::endian::FileEndianness;

	fn water() -> Topology {
		let mut mol = Molecule::new(1, "water");
		mol.instance_count = 2;
		let chain = mol.add_chain(1, "A");
		let res = mol.add_residue(1, "HOH", chain);
		let o = mol.add_atom(1, "O", "OW", res).unwrap();
		let h1 = mol.add_atom(2, "H1", "HW", res).unwrap();
		let h2 = mol.add_atom(3, "H2", "HW", res).unwrap();
		mol.add_bond(o, h1).unwrap();
		mol.add_bond(o, h2).unwrap();
		let mut top = Topology::default();
		top.add_molecule(mol);
		top
	}

	#[test]
	fn round_trip() {
		let top = water();
		let prim = Primitives::new(FileEndianness::Little);
		let mut buf = Cursor::new(Vec::new());
		top.write(&mut buf, &prim).unwrap();
		buf.set_position(0);
		let back = Topology::read(&mut buf, &prim).unwrap();
		assert_eq!(top, back);
	}

	#[test]
	fn find_by_name_and_id() {
		let top = water();
		assert!(top.find_molecule(Some("water"), None).is_some());
		assert!(top.find_molecule(Some(""), Some(1)).is_some());
		assert!(top.find_molecule(Some("ethanol"), None).is_none());

		let mol = &top.molecules[0];
		assert!(mol.find_atom(Some("H1"), Some(-1)).is_some());
		assert_eq!(mol.find_atom(None, Some(3)).unwrap().name, "H2");
	}

	#[test]
	fn instance_offsets_match_global_id_formula() {
		let top = water();
		let offsets = top.instance_offsets();
		assert_eq!(offsets, vec![0, 3]);
		assert_eq!(top.num_particles(), 6);
	}
}
