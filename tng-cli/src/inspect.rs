use anyhow::{bail, Result};
use tng::data_block::TypedBuffer;
use tng::Trajectory;

pub fn info(traj: &mut Trajectory) -> Result<()> {
	println!("first program : {}", traj.first_program_name());
	println!("last program  : {}", traj.last_program_name());
	println!("first user    : {}", traj.first_user_name());
	println!("last user     : {}", traj.last_user_name());
	println!("creation time : {}", traj.creation_time());
	println!("force field   : {}", traj.forcefield_name());
	println!("particles     : {}", traj.num_particles());
	println!("frames        : {}", traj.num_frames()?);
	println!("frame sets    : {}", traj.num_frame_sets()?);
	Ok(())
}

pub fn topology(traj: &mut Trajectory) -> Result<()> {
	for mol in &traj.topology().molecules {
		println!("molecule {} \"{}\" x{}", mol.id, mol.name, mol.instance_count);
		for chain in &mol.chains {
			println!("  chain {} \"{}\"", chain.id, chain.name);
		}
		for residue in &mol.residues {
			println!("  residue {} \"{}\"", residue.id, residue.name);
		}
		for atom in &mol.atoms {
			println!("  atom {} \"{}\" ({})", atom.id, atom.name, atom.atom_type);
		}
		for bond in &mol.bonds {
			println!("  bond {} - {}", bond.atom_a, bond.atom_b);
		}
	}
	Ok(())
}

pub fn frame_sets(traj: &mut Trajectory) -> Result<()> {
	let n = traj.num_frame_sets()?;
	for i in 0..n as i64 {
		traj.frame_set_nr_find(i)?;
		let fs = traj.current_frame_set().expect("frame_set_nr_find populates current");
		print!(
			"frame set {i} @{}: frames [{}, {}) ",
			fs.header.this_pos,
			fs.header.first_frame,
			fs.header.first_frame + fs.header.frame_count
		);
		let ids: Vec<String> = fs.blocks.iter().map(|b| format!("{:#x}:{}", b.id, b.name)).collect();
		println!("blocks: [{}]", ids.join(", "));
	}
	Ok(())
}

pub fn dump(traj: &mut Trajectory, block_id: i64, frame_set: i64) -> Result<()> {
	let (values, shape) = traj.data_vector_get(block_id, frame_set)?;
	println!(
		"shape: {} frames x {} particles x {} values",
		shape.n_frames,
		shape.n_particles.unwrap_or(1),
		shape.n_values_per_frame
	);
	match values {
		TypedBuffer::Char(v) => v.iter().for_each(|s| println!("{s}")),
		TypedBuffer::Int(v) => v.iter().for_each(|x| println!("{x}")),
		TypedBuffer::Float(v) => v.iter().for_each(|x| println!("{x}")),
		TypedBuffer::Double(v) => v.iter().for_each(|x| println!("{x}")),
	}
	Ok(())
}

/// Walks every frame set, which forces each block's stored MD5 to be
/// recomputed and compared (`Trajectory` logs a warning per mismatch rather
/// than aborting — spec §4.3).
pub fn verify(traj: &mut Trajectory) -> Result<()> {
	let n = traj.num_frame_sets()?;
	if n == 0 {
		bail!("trajectory has no frame sets");
	}
	for i in 0..n as i64 {
		traj.frame_set_nr_find(i)?;
	}
	println!("checked {n} frame set(s); see warnings above for any hash mismatch");
	Ok(())
}
