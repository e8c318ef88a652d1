use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

mod cli;
mod inspect;

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::builder()
		.filter_level(cli.verbose.log_level_filter())
		.init();

	let mut traj = tng::Trajectory::open_read(&cli.path)?;

	match cli.command {
		Command::Info => inspect::info(&mut traj)?,
		Command::Topology => inspect::topology(&mut traj)?,
		Command::FrameSets => inspect::frame_sets(&mut traj)?,
		Command::Dump { block_id, frame_set } => inspect::dump(&mut traj, block_id, frame_set)?,
		Command::Verify => inspect::verify(&mut traj)?,
	}

	Ok(())
}
