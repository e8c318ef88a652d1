use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
	/// Path to the trajectory file
	pub path: PathBuf,

	#[command(subcommand)]
	pub command: Command,

	#[command(flatten)]
	pub verbose: Verbosity<WarnLevel>,
}

#[derive(Subcommand)]
pub enum Command {
	/// Print provenance and layout metadata (program/user/computer names,
	/// frame and particle counts, stride lengths).
	Info,

	/// List every frame set's position, frame range and the data blocks it
	/// carries.
	FrameSets,

	/// Print molecules/chains/residues/atoms/bonds.
	Topology,

	/// Dump one data block's values from a single frame set.
	Dump {
		/// Block id, in hex (e.g. 0x1000_0001) or decimal.
		#[arg(value_parser = parse_block_id)]
		block_id: i64,
		/// 0-based frame set ordinal.
		#[arg(short, long, default_value_t = 0)]
		frame_set: i64,
	},

	/// Re-read every block and report any MD5 mismatches without stopping at
	/// the first one.
	Verify,
}

fn parse_block_id(s: &str) -> Result<i64, std::num::ParseIntError> {
	if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
		i64::from_str_radix(hex, 16)
	} else {
		s.parse()
	}
}
