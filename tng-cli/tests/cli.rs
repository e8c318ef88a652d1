//! Black-box checks of the `tng-cli` binary, built against scratch files
//! assembled with the `tng` library directly rather than committed golden
//! images — the binary's subcommands are plain read-only inspectors, so
//! there's no golden-image harness to mount the way the teacher's FUSE
//! integration tests do.

use assert_cmd::Command;
use tempfile::NamedTempFile;
use tng::trajectory::{OpenOptions, Trajectory};
use tng::FileEndianness;

fn scratch_path() -> std::path::PathBuf {
	let f = NamedTempFile::new().unwrap();
	let path = f.path().to_path_buf();
	drop(f);
	path
}

fn sample_trajectory() -> std::path::PathBuf {
	let path = scratch_path();
	let options = OpenOptions::default().frames_per_frame_set(5);
	let mut traj = Trajectory::create(&path, FileEndianness::Little, options).unwrap();
	traj.set_first_program_name("cli-fixture").unwrap();
	traj.write_headers().unwrap();
	traj.frame_set_new(0, 0.0).unwrap();
	traj.particle_mapping_add(0, &(0u64..2).collect::<Vec<_>>()).unwrap();
	let values: Vec<f32> = (0..6).map(|i| i as f32).collect();
	tng::trajectory::util::positions_write(&mut traj, 0, 0, 2, &values).unwrap();
	traj.frame_set_close().unwrap();
	traj.close().unwrap();
	path
}

fn stdout_of(cmd: &mut Command) -> String {
	let output = cmd.output().unwrap();
	assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
	String::from_utf8(output.stdout).unwrap()
}

#[test]
fn info_prints_provenance_and_counts() {
	let path = sample_trajectory();
	let mut cmd = Command::cargo_bin("tng-cli").unwrap();
	cmd.arg(&path).arg("info");
	let out = stdout_of(&mut cmd);
	assert!(out.contains("first program : cli-fixture"));
	assert!(out.contains("frames        : 1"));
	assert!(out.contains("frame sets    : 1"));
}

#[test]
fn frame_sets_lists_the_positions_block() {
	let path = sample_trajectory();
	let mut cmd = Command::cargo_bin("tng-cli").unwrap();
	cmd.arg(&path).arg("frame-sets");
	let out = stdout_of(&mut cmd);
	assert!(out.contains("frame set 0"));
	assert!(out.contains("frames [0, 5)"));
}

#[test]
fn dump_prints_requested_block_values() {
	let path = sample_trajectory();
	let mut cmd = Command::cargo_bin("tng-cli").unwrap();
	cmd.arg(&path).arg("dump").arg(format!("{:#x}", tng::block::ids::TRAJ_POSITIONS));
	let out = stdout_of(&mut cmd);
	assert!(out.contains("shape: 1 frames x 2 particles x 3 values"));
	assert!(out.lines().any(|l| l == "0"));
}

#[test]
fn verify_reports_checked_frame_set_count() {
	let path = sample_trajectory();
	let mut cmd = Command::cargo_bin("tng-cli").unwrap();
	cmd.arg(&path).arg("verify");
	let out = stdout_of(&mut cmd);
	assert!(out.contains("checked 1 frame set(s)"));
}

#[test]
fn missing_file_fails_with_nonzero_status() {
	let path = scratch_path(); // never created
	let mut cmd = Command::cargo_bin("tng-cli").unwrap();
	cmd.arg(&path).arg("info");
	let output = cmd.output().unwrap();
	assert!(!output.status.success());
}
