//! Trajectory root: open/close state machine, header I/O, frame-set
//! iteration and the public surface (spec §3 "Trajectory (root)", §4.8, §4.9).

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::block::{self, ids, BlockHeader, BlockKind};
use crate::codec::{self, CodecRegistry};
use crate::data_block::{DataBlock, TypedBuffer};
use crate::endian::{FileEndianness, Primitives};
use crate::error::{Error, Result};
use crate::frameset::{FrameSet, FrameSetHeader, HeaderSource, StrideConfig, NONE_POINTER};
use crate::hash::{HashKind, HashMode};
use crate::mapping::{self, ParticleMapping};
use crate::topology::Topology;
use crate::value::{DataType, Shape};

const FRAME_SET_BLOCK_NAME: &str = "TRAJECTORY FRAME SET";
const GENERAL_INFO_NAME: &str = "GENERAL INFO";
const MOLECULES_NAME: &str = "MOLECULES";
const MAPPING_NAME: &str = "PARTICLE MAPPING";
const CREATION_TIME_LEN: usize = 24;

/// Order of the fixed `i64`/`f64` fields inside a [`FrameSetHeader`] body, in
/// bytes-per-field, used to compute the absolute file offset of a single
/// field for in-place back-patching (spec §4.5 "On append").
const POINTER_FIELD_WIDTH: i64 = 8;
enum PointerField {
	NextPos = 5,
	MediumNextPos = 7,
	LongNextPos = 9,
}

fn pointer_field_offset(header_pos: i64, field: PointerField) -> i64 {
	header_pos + block::fixed_header_len() as i64 + FRAME_SET_BLOCK_NAME.len() as i64 + (field as i64) * POINTER_FIELD_WIDTH
}

/// How a trajectory file is opened (spec §6 "Open modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
	Read,
	Write,
	Append,
}

/// Write-time defaults, analogous to the teacher's `BlockReader::open`
/// plus feature flags — the engine has no config file, but these parameters
/// have to come from somewhere when a trajectory is created from scratch.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
	pub hash_mode: HashMode,
	pub frames_per_frame_set: i64,
	pub medium_stride_length: i64,
	pub long_stride_length: i64,
}

impl Default for OpenOptions {
	fn default() -> Self {
		Self {
			hash_mode: HashMode::Use,
			frames_per_frame_set: 100,
			medium_stride_length: 10,
			long_stride_length: 100,
		}
	}
}

impl OpenOptions {
	pub fn hash_mode(mut self, mode: HashMode) -> Self {
		self.hash_mode = mode;
		self
	}

	pub fn frames_per_frame_set(mut self, n: i64) -> Self {
		self.frames_per_frame_set = n;
		self
	}

	pub fn medium_stride_length(mut self, n: i64) -> Self {
		self.medium_stride_length = n;
		self
	}

	pub fn long_stride_length(mut self, n: i64) -> Self {
		self.long_stride_length = n;
		self
	}
}

/// Controller state (spec §4.8). `Append` is a transient [`OpenMode`], not a
/// resting state: once positioned at end of file it settles into `OpenWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Closed,
	OpenRead { headers_read: bool },
	OpenWrite { headers_written: bool, frame_set_open: bool },
}

#[derive(Debug, Clone, Default)]
struct GeneralInfo {
	first_program_name: String,
	last_program_name: String,
	first_user_name: String,
	last_user_name: String,
	first_computer_name: String,
	last_computer_name: String,
	first_signature: String,
	last_signature: String,
	creation_time: String,
	forcefield_name: String,
	distance_unit_exponent: i64,
	time_per_frame: f64,
	frames_per_frame_set: i64,
	medium_stride_length: i64,
	long_stride_length: i64,
	first_frame_set_pos: i64,
	last_frame_set_pos: i64,
	hash_kind: HashKind,
}

impl GeneralInfo {
	fn read<R: Read>(r: &mut R, prim: &Primitives) -> Result<Self> {
		let read_capped = |r: &mut R| -> Result<String> {
			let (s, trunc) = prim.read_string(r)?;
			if let Some(e) = trunc {
				log::warn!("general info field truncated on read: {e}");
			}
			Ok(s)
		};
		let first_program_name = read_capped(r)?;
		let last_program_name = read_capped(r)?;
		let first_user_name = read_capped(r)?;
		let last_user_name = read_capped(r)?;
		let first_computer_name = read_capped(r)?;
		let last_computer_name = read_capped(r)?;
		let first_signature = read_capped(r)?;
		let last_signature = read_capped(r)?;
		let mut creation_time_buf = [0u8; CREATION_TIME_LEN];
		r.read_exact(&mut creation_time_buf)?;
		let creation_time = String::from_utf8_lossy(&creation_time_buf).trim_end().to_string();
		let forcefield_name = read_capped(r)?;
		let distance_unit_exponent = prim.read_i64(r)?;
		let time_per_frame = prim.read_f64(r)?;
		let frames_per_frame_set = prim.read_i64(r)?;
		let medium_stride_length = prim.read_i64(r)?;
		let long_stride_length = prim.read_i64(r)?;
		let first_frame_set_pos = prim.read_i64(r)?;
		let last_frame_set_pos = prim.read_i64(r)?;
		let hash_kind = match prim.read_u32(r)? {
			0 => HashKind::None,
			1 => HashKind::Md5,
			other => return Err(Error::FormatViolation(format!("unknown hash kind tag {other}"))),
		};
		Ok(Self {
			first_program_name,
			last_program_name,
			first_user_name,
			last_user_name,
			first_computer_name,
			last_computer_name,
			first_signature,
			last_signature,
			creation_time,
			forcefield_name,
			distance_unit_exponent,
			time_per_frame,
			frames_per_frame_set,
			medium_stride_length,
			long_stride_length,
			first_frame_set_pos,
			last_frame_set_pos,
			hash_kind,
		})
	}

	fn write<W: Write>(&self, w: &mut W, prim: &Primitives) -> Result<()> {
		prim.write_string(w, &self.first_program_name)?;
		prim.write_string(w, &self.last_program_name)?;
		prim.write_string(w, &self.first_user_name)?;
		prim.write_string(w, &self.last_user_name)?;
		prim.write_string(w, &self.first_computer_name)?;
		prim.write_string(w, &self.last_computer_name)?;
		prim.write_string(w, &self.first_signature)?;
		prim.write_string(w, &self.last_signature)?;
		let mut creation_time_buf = [b' '; CREATION_TIME_LEN];
		let bytes = self.creation_time.as_bytes();
		let n = bytes.len().min(CREATION_TIME_LEN);
		creation_time_buf[..n].copy_from_slice(&bytes[..n]);
		w.write_all(&creation_time_buf)?;
		prim.write_string(w, &self.forcefield_name)?;
		prim.write_i64(w, self.distance_unit_exponent)?;
		prim.write_f64(w, self.time_per_frame)?;
		prim.write_i64(w, self.frames_per_frame_set)?;
		prim.write_i64(w, self.medium_stride_length)?;
		prim.write_i64(w, self.long_stride_length)?;
		prim.write_i64(w, self.first_frame_set_pos)?;
		prim.write_i64(w, self.last_frame_set_pos)?;
		prim.write_u32(w, match self.hash_kind {
			HashKind::None => 0,
			HashKind::Md5 => 1,
		})?;
		Ok(())
	}
}

fn set_capped(field: &mut String, value: &str) -> Result<()> {
	if value.len() > crate::endian::MAX_STR_LEN {
		*field = value[..crate::endian::MAX_STR_LEN].to_string();
		return Err(Error::Truncated {
			available: crate::endian::MAX_STR_LEN,
			needed: value.len(),
		});
	}
	*field = value.to_string();
	Ok(())
}

/// The trajectory container (spec §3 "Trajectory (root)").
///
/// One OS file handle serves both read and write positions: every operation
/// seeks explicitly before it reads or writes, so a single [`File`] opened in
/// the right mode covers the input/output split spec.md's data model
/// describes (see DESIGN.md for the full rationale).
pub struct Trajectory {
	path: Option<PathBuf>,
	file: Option<File>,
	state: State,
	endianness: FileEndianness,
	hash_mode: HashMode,

	info: GeneralInfo,
	topology: Topology,
	non_trajectory_blocks: Vec<DataBlock>,

	current: Option<FrameSet>,
	num_frame_sets_cache: Option<u64>,
	num_frames_cache: Option<u64>,

	codecs: CodecRegistry,
	write_frequencies: HashMap<i64, i64>,
}

impl HeaderSource for Trajectory {
	fn header_at(&mut self, pos: i64) -> Result<FrameSetHeader> {
		let prim = self.prim();
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(pos as u64))?;
		let header = BlockHeader::read(file, &prim)?;
		if header.id != ids::TRAJECTORY_FRAME_SET {
			return Err(Error::FormatViolation(format!(
				"expected a frame-set header at {pos}, found block id {:#x}",
				header.id
			)));
		}
		FrameSetHeader::read(file, &prim)
	}
}

impl Trajectory {
	fn prim(&self) -> Primitives {
		Primitives::new(self.endianness)
	}

	fn file_mut(&mut self) -> Result<&mut File> {
		self.file.as_mut().ok_or_else(|| Error::FormatViolation("trajectory is not open".into()))
	}

	fn stride_config(&self) -> StrideConfig {
		StrideConfig {
			medium_stride: self.info.medium_stride_length,
			long_stride: self.info.long_stride_length,
		}
	}

	/// Opens an existing trajectory read-only (spec §4.8 "`open(r)`").
	pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		let mut file = File::open(&path)?;
		let mut tag = [0u8; 1];
		file.read_exact(&mut tag)?;
		let endianness = match tag[0] {
			0 => FileEndianness::Little,
			1 => FileEndianness::Big,
			other => return Err(Error::FormatViolation(format!("unknown file endianness tag {other}"))),
		};
		let prim = Primitives::new(endianness);

		let header = BlockHeader::read(&mut file, &prim)?;
		if header.id != ids::GENERAL_INFO {
			return Err(Error::FormatViolation("first block is not GENERAL INFO".into()));
		}
		let body = crate::endian::read_exact_vec(&mut file, header.body_len())?;
		header.verify(&body, HashMode::Use).unwrap_or_else(|e| log::warn!("{e}"));
		let info = GeneralInfo::read(&mut body.as_slice(), &prim)?;

		let mol_header = BlockHeader::read(&mut file, &prim)?;
		if mol_header.id != ids::MOLECULES {
			return Err(Error::FormatViolation("second block is not MOLECULES".into()));
		}
		let mol_body = crate::endian::read_exact_vec(&mut file, mol_header.body_len())?;
		mol_header.verify(&mol_body, HashMode::Use).unwrap_or_else(|e| log::warn!("{e}"));
		let topology = Topology::read(&mut mol_body.as_slice(), &prim)?;

		let mut non_trajectory_blocks = Vec::new();
		loop {
			let pos = file.stream_position()?;
			if info.first_frame_set_pos >= 0 && pos as i64 == info.first_frame_set_pos {
				break;
			}
			let header = match BlockHeader::read(&mut file, &prim) {
				Ok(h) => h,
				Err(_) => break,
			};
			let body = crate::endian::read_exact_vec(&mut file, header.body_len())?;
			header.verify(&body, HashMode::Use).unwrap_or_else(|e| log::warn!("{e}"));
			let block = DataBlock::read_body(&mut body.as_slice(), &prim, &CodecRegistry::new(), header.id, header.name, header.body_len())?;
			non_trajectory_blocks.push(block);
		}

		log::debug!("opened {} read-only, {} non-trajectory blocks", path.display(), non_trajectory_blocks.len());

		Ok(Self {
			path: Some(path),
			file: Some(file),
			state: State::OpenRead { headers_read: true },
			endianness,
			hash_mode: HashMode::Use,
			info,
			topology,
			non_trajectory_blocks,
			current: None,
			num_frame_sets_cache: None,
			num_frames_cache: None,
			codecs: CodecRegistry::new(),
			write_frequencies: HashMap::new(),
		})
	}

	/// Creates a new trajectory, truncating any existing file (spec §4.8
	/// "`open(w)`"). Headers must be written (`write_headers`) before any
	/// frame set can be opened.
	pub fn create(path: impl AsRef<Path>, endianness: FileEndianness, options: OpenOptions) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		let file = File::options().read(true).write(true).create(true).truncate(true).open(&path)?;

		let info = GeneralInfo {
			frames_per_frame_set: options.frames_per_frame_set,
			medium_stride_length: options.medium_stride_length,
			long_stride_length: options.long_stride_length,
			first_frame_set_pos: NONE_POINTER,
			last_frame_set_pos: NONE_POINTER,
			hash_kind: HashKind::Md5,
			..Default::default()
		};

		log::debug!("created {} for writing, endianness={endianness:?}", path.display());

		Ok(Self {
			path: Some(path),
			file: Some(file),
			state: State::OpenWrite { headers_written: false, frame_set_open: false },
			endianness,
			hash_mode: options.hash_mode,
			info,
			topology: Topology::default(),
			non_trajectory_blocks: Vec::new(),
			current: None,
			num_frame_sets_cache: Some(0),
			num_frames_cache: Some(0),
			codecs: CodecRegistry::new(),
			write_frequencies: HashMap::new(),
		})
	}

	/// Opens for appending: reads existing headers, scans to the last frame
	/// set, then accepts new frame sets whose `prev_pos` chains off the
	/// pre-existing last one (spec §4.8 "`open(a)`").
	pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
		let mut traj = Self::open_read(path)?;
		traj.file.as_mut().unwrap().seek(SeekFrom::End(0))?;
		traj.state = State::OpenWrite { headers_written: true, frame_set_open: false };
		log::debug!("{} reopened for append", traj.path.as_ref().unwrap().display());
		Ok(traj)
	}

	/// Writes the general-info and molecules headers (spec §4.8: "header
	/// blocks must be emitted before any frame set").
	pub fn write_headers(&mut self) -> Result<()> {
		let State::OpenWrite { headers_written, .. } = &mut self.state else {
			return Err(Error::FormatViolation("write_headers requires an open-for-write trajectory".into()));
		};
		if *headers_written {
			return Ok(());
		}
		let prim = self.prim();

		let mut file = self.file.take().ok_or_else(|| Error::FormatViolation("trajectory is not open".into()))?;
		file.seek(SeekFrom::Start(0))?;
		file.write_all(&[match self.endianness {
			FileEndianness::Little => 0u8,
			FileEndianness::Big => 1u8,
		}])?;

		let mut info_body = Vec::new();
		self.info.write(&mut info_body, &prim)?;
		block::write_block(&mut file, &prim, BlockKind::NonTrajectory, ids::GENERAL_INFO, GENERAL_INFO_NAME, 1, &info_body, self.hash_mode)?;

		let mut mol_body = Vec::new();
		self.topology.write(&mut mol_body, &prim)?;
		block::write_block(&mut file, &prim, BlockKind::NonTrajectory, ids::MOLECULES, MOLECULES_NAME, 1, &mol_body, self.hash_mode)?;

		for block in &self.non_trajectory_blocks {
			let mut body = Vec::new();
			block.write_body(&mut body, &prim, &self.codecs)?;
			block::write_block(&mut file, &prim, BlockKind::NonTrajectory, block.id, &block.name, 1, &body, self.hash_mode)?;
		}

		self.file = Some(file);
		if let State::OpenWrite { headers_written, .. } = &mut self.state {
			*headers_written = true;
		}
		log::debug!("wrote headers ({} non-trajectory blocks)", self.non_trajectory_blocks.len());
		Ok(())
	}

	/// Closes the trajectory: flushes any open frame set, patches the
	/// last-frame-set pointer in the general-info block, releases the handle
	/// (spec §4.8 "`close`").
	pub fn close(&mut self) -> Result<()> {
		if matches!(self.state, State::Closed) {
			return Ok(());
		}
		if let State::OpenWrite { frame_set_open: true, .. } = self.state {
			self.frame_set_close()?;
		}
		if let State::OpenWrite { headers_written: true, .. } = self.state {
			self.patch_last_frame_set_pos()?;
		}
		self.state = State::Closed;
		self.file = None;
		log::debug!("closed {:?}", self.path);
		Ok(())
	}

	/// Rewrites the whole general-info block body in place with the current
	/// `first_frame_set_pos`/`last_frame_set_pos`. A byte-offset patch (as
	/// used for frame-set pointers in [`Self::patch_pointer`]) would have to
	/// account for every variable-length string field preceding these two
	/// fixed `i64`s; rewriting the body outright sidesteps that entirely,
	/// and the body's total length cannot change since `write_headers` fixed
	/// it.
	fn patch_last_frame_set_pos(&mut self) -> Result<()> {
		let prim = self.prim();
		let general_info_pos = 1i64; // immediately after the one-byte endianness tag
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(general_info_pos as u64))?;
		let header = BlockHeader::read(file, &prim)?;
		let body_start = file.stream_position()?;

		let mut info_body = Vec::new();
		self.info.write(&mut info_body, &prim)?;
		if info_body.len() != header.body_len() {
			return Err(Error::FormatViolation("general info body length changed after headers were written".into()));
		}
		let hash = if self.hash_mode == HashMode::Use { crate::hash::md5_of(&info_body) } else { crate::hash::zero_hash() };

		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(body_start))?;
		file.write_all(&info_body)?;
		file.seek(SeekFrom::Start(general_info_pos as u64 + 8 + 8 + 8))?;
		file.write_all(&hash)?;
		file.seek(SeekFrom::End(0))?;
		Ok(())
	}

	// ---- metadata accessors (spec §4.9 "Metadata get/set") ----

	pub fn first_program_name(&self) -> &str {
		&self.info.first_program_name
	}
	pub fn set_first_program_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.first_program_name, value)
	}
	pub fn last_program_name(&self) -> &str {
		&self.info.last_program_name
	}
	pub fn set_last_program_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.last_program_name, value)
	}
	pub fn first_user_name(&self) -> &str {
		&self.info.first_user_name
	}
	pub fn set_first_user_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.first_user_name, value)
	}
	pub fn last_user_name(&self) -> &str {
		&self.info.last_user_name
	}
	pub fn set_last_user_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.last_user_name, value)
	}
	pub fn first_computer_name(&self) -> &str {
		&self.info.first_computer_name
	}
	pub fn set_first_computer_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.first_computer_name, value)
	}
	pub fn last_computer_name(&self) -> &str {
		&self.info.last_computer_name
	}
	pub fn set_last_computer_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.last_computer_name, value)
	}
	pub fn first_signature(&self) -> &str {
		&self.info.first_signature
	}
	pub fn set_first_signature(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.first_signature, value)
	}
	pub fn last_signature(&self) -> &str {
		&self.info.last_signature
	}
	pub fn set_last_signature(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.last_signature, value)
	}
	pub fn creation_time(&self) -> &str {
		&self.info.creation_time
	}
	pub fn set_creation_time(&mut self, value: &str) {
		let n = value.len().min(CREATION_TIME_LEN);
		self.info.creation_time = value[..n].to_string();
	}
	pub fn forcefield_name(&self) -> &str {
		&self.info.forcefield_name
	}
	pub fn set_forcefield_name(&mut self, value: &str) -> Result<()> {
		set_capped(&mut self.info.forcefield_name, value)
	}
	pub fn distance_unit_exponent(&self) -> i64 {
		self.info.distance_unit_exponent
	}
	pub fn set_distance_unit_exponent(&mut self, value: i64) {
		self.info.distance_unit_exponent = value;
	}
	pub fn time_per_frame(&self) -> f64 {
		self.info.time_per_frame
	}
	pub fn set_time_per_frame(&mut self, value: f64) {
		self.info.time_per_frame = value;
	}

	/// Sets frames-per-frame-set for sets created from now on. Per spec §9
	/// Open Question, this does not retroactively renumber existing frame
	/// sets.
	pub fn set_frames_per_frame_set(&mut self, value: i64) {
		self.info.frames_per_frame_set = value;
	}

	pub fn topology(&self) -> &Topology {
		&self.topology
	}
	pub fn topology_mut(&mut self) -> &mut Topology {
		&mut self.topology
	}

	/// Registers a codec implementation for `id`, e.g. the caller's real XTC
	/// or format-specific codec (spec §1 "External collaborators").
	pub fn register_codec(&mut self, id: i64, codec: Box<dyn codec::Codec>) {
		self.codecs.register(id, codec);
	}

	/// Overrides the stride a lazily created block will use, before its
	/// first write (restored from `original_source`, SPEC_FULL.md #4).
	pub fn set_write_frequency(&mut self, block_id: i64, stride: i64) {
		self.write_frequencies.insert(block_id, stride);
	}

	pub fn num_particles(&self) -> u64 {
		self.topology.num_particles()
	}

	/// Total frames across every frame set (spec §4.9 `num_frames_get`),
	/// cached and recomputed lazily once stale.
	pub fn num_frames(&mut self) -> Result<u64> {
		if let Some(n) = self.num_frames_cache {
			return Ok(n);
		}
		let mut total = 0u64;
		let mut pos = self.info.first_frame_set_pos;
		while pos != NONE_POINTER {
			let header = self.header_at(pos)?;
			total += header.frame_count as u64;
			pos = header.next_pos;
		}
		self.num_frames_cache = Some(total);
		Ok(total)
	}

	/// Number of frame sets (spec §4.9 `num_frame_sets_get`), cached.
	pub fn num_frame_sets(&mut self) -> Result<u64> {
		if let Some(n) = self.num_frame_sets_cache {
			return Ok(n);
		}
		let mut count = 0u64;
		let mut pos = self.info.first_frame_set_pos;
		while pos != NONE_POINTER {
			let header = self.header_at(pos)?;
			count += 1;
			pos = header.next_pos;
		}
		self.num_frame_sets_cache = Some(count);
		Ok(count)
	}

	fn invalidate_counts(&mut self) {
		self.num_frame_sets_cache = None;
		self.num_frames_cache = None;
	}

	/// Seeks to the `n`-th frame set and makes it current (spec §4.5, §4.9
	/// `frame_set_nr_find`).
	pub fn frame_set_nr_find(&mut self, n: i64) -> Result<()> {
		let cfg = self.stride_config();
		let first_pos = self.info.first_frame_set_pos;
		let header = crate::frameset::seek_ordinal(self, first_pos, cfg, n)?;
		self.load_frame_set_at(header.this_pos)
	}

	/// Seeks to the frame set containing absolute frame `f` and makes it
	/// current (spec §4.5, §4.9 `frame_set_of_frame_find`).
	pub fn frame_set_of_frame_find(&mut self, f: i64) -> Result<()> {
		let cfg = self.stride_config();
		let first_pos = self.info.first_frame_set_pos;
		let header = crate::frameset::seek_frame(self, first_pos, cfg, f)?;
		self.load_frame_set_at(header.this_pos)
	}

	/// Reads the frame set at `pos` (its header, mappings, and data blocks)
	/// into `self.current`, consuming blocks until `next_pos` or EOF.
	fn load_frame_set_at(&mut self, pos: i64) -> Result<()> {
		let prim = self.prim();
		let hash_mode = self.hash_mode;
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(pos as u64))?;
		let fs_header = BlockHeader::read(file, &prim)?;
		if fs_header.id != ids::TRAJECTORY_FRAME_SET {
			return Err(Error::FormatViolation(format!("expected frame set at {pos}, found {:#x}", fs_header.id)));
		}
		let body = crate::endian::read_exact_vec(file, fs_header.body_len())?;
		fs_header.verify(&body, hash_mode).unwrap_or_else(|e| log::warn!("{e}"));
		let header = FrameSetHeader::read(&mut body.as_slice(), &prim)?;

		let mut mappings = Vec::new();
		let mut blocks = Vec::new();
		loop {
			let here = self.file_mut()?.stream_position()? as i64;
			if here == header.next_pos || (header.next_pos == NONE_POINTER && peek_is_frame_set(self, &prim)?) {
				break;
			}
			let file = self.file_mut()?;
			let Ok(block_header) = BlockHeader::read(file, &prim) else { break };
			if block_header.id == ids::TRAJECTORY_FRAME_SET {
				// Stepped into the next frame set; rewind and stop.
				let file = self.file_mut()?;
				file.seek(SeekFrom::Start(here as u64))?;
				break;
			}
			let body = crate::endian::read_exact_vec(self.file_mut()?, block_header.body_len())?;
			block_header.verify(&body, hash_mode).unwrap_or_else(|e| log::warn!("{e}"));
			if block_header.id == ids::PARTICLE_MAPPING {
				mappings.push(ParticleMapping::read(&mut body.as_slice(), &prim, body.len())?);
			} else {
				blocks.push(DataBlock::read_body(&mut body.as_slice(), &prim, &self.codecs, block_header.id, block_header.name, block_header.body_len())?);
			}
			if header.next_pos != NONE_POINTER && self.file_mut()?.stream_position()? as i64 >= header.next_pos {
				break;
			}
		}
		mapping::check_disjoint(&mappings)?;

		self.current = Some(FrameSet { header, mappings, blocks });
		Ok(())
	}

	/// Starts a new frame set, closing any currently open one first (spec
	/// §4.8 "`frame_set_new` ... closes any open frame set first").
	pub fn frame_set_new(&mut self, first_frame: i64, first_frame_time: f64) -> Result<()> {
		let State::OpenWrite { headers_written, .. } = self.state else {
			return Err(Error::FormatViolation("frame_set_new requires an open-for-write trajectory".into()));
		};
		if !headers_written {
			return Err(Error::FormatViolation("write_headers must run before the first frame set".into()));
		}
		if let State::OpenWrite { frame_set_open: true, .. } = self.state {
			self.frame_set_close()?;
		}
		let frame_count = self.info.frames_per_frame_set;
		self.current = Some(FrameSet::new(first_frame, frame_count, first_frame_time));
		if let State::OpenWrite { frame_set_open, .. } = &mut self.state {
			*frame_set_open = true;
		}
		Ok(())
	}

	/// Flushes the open frame set: compresses/writes its blocks, back-patches
	/// this frame set's predecessor pointers, and the new frame set's own
	/// place in the medium/long skip chains (spec §4.5 "On append", §4.7
	/// "Buffered writes").
	pub fn frame_set_close(&mut self) -> Result<()> {
		let State::OpenWrite { frame_set_open: true, .. } = self.state else {
			return Ok(());
		};
		let mut fs = self.current.take().expect("frame_set_open implies self.current");
		fs.header.frames_written = fs.header.frame_count;
		fs.check_stored_frame_invariant()?;

		let prev_pos = self.info.last_frame_set_pos;
		let medium_prev_pos = self.walk_back(prev_pos, self.info.medium_stride_length)?;
		let long_prev_pos = self.walk_back(prev_pos, self.info.long_stride_length)?;

		let prim = self.prim();
		let file = self.file_mut()?;
		file.seek(SeekFrom::End(0))?;
		let this_pos = file.stream_position()? as i64;
		fs.header.this_pos = this_pos;
		fs.header.prev_pos = prev_pos;
		fs.header.next_pos = NONE_POINTER;
		fs.header.medium_prev_pos = medium_prev_pos;
		fs.header.medium_next_pos = NONE_POINTER;
		fs.header.long_prev_pos = long_prev_pos;
		fs.header.long_next_pos = NONE_POINTER;

		let mut body = Vec::new();
		fs.header.write(&mut body, &prim)?;
		let file = self.file_mut()?;
		block::write_block(file, &prim, BlockKind::Trajectory, ids::TRAJECTORY_FRAME_SET, FRAME_SET_BLOCK_NAME, 1, &body, self.hash_mode)?;

		for m in &fs.mappings {
			let mut body = Vec::new();
			m.write(&mut body, &prim)?;
			let file = self.file_mut()?;
			block::write_block(file, &prim, BlockKind::Trajectory, ids::PARTICLE_MAPPING, MAPPING_NAME, 1, &body, self.hash_mode)?;
		}
		for block in &fs.blocks {
			let mut body = Vec::new();
			block.write_body(&mut body, &prim, &self.codecs)?;
			let file = self.file_mut()?;
			block::write_block(file, &prim, BlockKind::Trajectory, block.id, &block.name, 1, &body, self.hash_mode)?;
		}

		if prev_pos != NONE_POINTER {
			self.patch_pointer(prev_pos, PointerField::NextPos, this_pos)?;
		}
		if medium_prev_pos != NONE_POINTER {
			self.patch_pointer(medium_prev_pos, PointerField::MediumNextPos, this_pos)?;
		}
		if long_prev_pos != NONE_POINTER {
			self.patch_pointer(long_prev_pos, PointerField::LongNextPos, this_pos)?;
		}

		if self.info.first_frame_set_pos == NONE_POINTER {
			self.info.first_frame_set_pos = this_pos;
		}
		self.info.last_frame_set_pos = this_pos;
		self.invalidate_counts();

		if let State::OpenWrite { frame_set_open, .. } = &mut self.state {
			*frame_set_open = false;
		}
		log::debug!("closed frame set at {this_pos} ({} frames)", fs.header.frame_count);
		Ok(())
	}

	/// Walks backward from `prev_pos` (the frame set immediately preceding
	/// the one being closed, i.e. already one stride step behind it) to the
	/// frame set exactly `stride` steps behind, by following `stride - 1`
	/// more `.prev_pos` hops (spec §4.5 "On append": "patches appropriate
	/// medium/long back-pointers by walking back `medium_stride`/
	/// `long_stride` frame sets using the existing chain").
	fn walk_back(&mut self, prev_pos: i64, stride: i64) -> Result<i64> {
		if stride <= 0 {
			return Ok(NONE_POINTER);
		}
		let mut pos = prev_pos;
		for _ in 0..stride - 1 {
			if pos == NONE_POINTER {
				return Ok(NONE_POINTER);
			}
			pos = self.header_at(pos)?.prev_pos;
		}
		Ok(pos)
	}

	fn patch_pointer(&mut self, header_pos: i64, field: PointerField, value: i64) -> Result<()> {
		let prim = self.prim();
		let offset = pointer_field_offset(header_pos, field);
		let file = self.file_mut()?;
		let end = file.stream_position()?;
		file.seek(SeekFrom::Start(offset as u64))?;
		prim.write_i64(file, value)?;
		file.seek(SeekFrom::Start(end))?;
		Ok(())
	}

	/// Finds a block by id in the currently resident frame set.
	pub fn find_block(&self, id: i64) -> Option<&DataBlock> {
		self.current.as_ref().and_then(|fs| fs.find_block(id))
	}

	/// The frame set currently loaded by `frame_set_nr_find`/
	/// `frame_set_of_frame_find`/`frame_set_new`, if any.
	pub fn current_frame_set(&self) -> Option<&FrameSet> {
		self.current.as_ref()
	}

	/// Creates (or replaces) a non-particle data block descriptor in the
	/// current frame set (spec §4.9 `data_block_add`).
	pub fn data_block_add(&mut self, id: i64, name: impl Into<String>, datatype: DataType, n_values_per_frame: i64, codec_id: i64) -> Result<()> {
		let fs = self.current_mut_for_write()?;
		let stride = 1;
		if let Some(existing) = fs.find_block_mut(id) {
			*existing = DataBlock::new_non_particle(id, name, datatype, n_values_per_frame, stride, codec_id);
		} else {
			fs.blocks.push(DataBlock::new_non_particle(id, name, datatype, n_values_per_frame, stride, codec_id));
		}
		Ok(())
	}

	/// Creates (or replaces) a particle-dependent data block descriptor in
	/// the current frame set (spec §4.9 `particle_data_block_add`).
	pub fn particle_data_block_add(
		&mut self,
		id: i64,
		name: impl Into<String>,
		datatype: DataType,
		n_values_per_frame: i64,
		codec_id: i64,
		first_particle_number: u64,
		particle_count: u64,
	) -> Result<()> {
		let stride = self.write_frequencies.get(&id).copied().unwrap_or(1);
		let fs = self.current_mut_for_write()?;
		let block = DataBlock::new_particle(id, name, datatype, n_values_per_frame, stride, codec_id, first_particle_number, particle_count);
		if let Some(existing) = fs.find_block_mut(id) {
			*existing = block;
		} else {
			fs.blocks.push(block);
		}
		Ok(())
	}

	/// Registers a particle mapping in the current frame set: local indices
	/// `first_particle_number .. first_particle_number + mapping_table.len()`
	/// map to the real particle ids in `mapping_table`, which need not be
	/// contiguous (spec §4.6; `tng_particle_mapping_add` in
	/// `examples/original_source/include/tng_io.h`). Mappings in one frame
	/// set must be pairwise disjoint over their local ranges; this is checked
	/// when the frame set is next read back (`load_frame_set_at`), matching
	/// the way every other on-disk invariant in this engine is enforced on
	/// read rather than eagerly on every mutation.
	pub fn particle_mapping_add(&mut self, first_particle_number: u64, mapping_table: &[u64]) -> Result<()> {
		let fs = self.current_mut_for_write()?;
		fs.mappings.push(ParticleMapping::new(first_particle_number, mapping_table.to_vec()));
		Ok(())
	}

	fn current_mut_for_write(&mut self) -> Result<&mut FrameSet> {
		if !matches!(self.state, State::OpenWrite { frame_set_open: true, .. }) {
			return Err(Error::FormatViolation("no frame set is open for writing".into()));
		}
		self.current.as_mut().ok_or_else(|| Error::FormatViolation("no frame set is open for writing".into()))
	}

	/// Deposits one frame's worth of values into a non-particle block in the
	/// current frame set, creating the block lazily if needed (spec §4.9
	/// `frame_data_write`).
	pub fn frame_data_write(&mut self, id: i64, name: &str, datatype: DataType, n_values_per_frame: i64, codec_id: i64, frame: i64, values: &TypedBuffer) -> Result<()> {
		let stride = self.write_frequencies.get(&id).copied().unwrap_or(1);
		let fs = self.current_mut_for_write()?;
		if fs.find_block(id).is_none() {
			let mut block = DataBlock::new_non_particle(id, name, datatype, n_values_per_frame, stride, codec_id);
			block.first_frame_number = frame - frame % stride;
			fs.blocks.push(block);
		}
		let block = fs.find_block_mut(id).expect("just inserted");
		let slot = ((frame - block.first_frame_number) / block.stride) as usize;
		block.write_frame_slot(slot, values)
	}

	/// Deposits one frame's worth of values into a particle-dependent block,
	/// creating it lazily if needed (spec §4.9 `frame_particle_data_write`).
	pub fn frame_particle_data_write(
		&mut self,
		id: i64,
		name: &str,
		datatype: DataType,
		n_values_per_frame: i64,
		codec_id: i64,
		first_particle_number: u64,
		particle_count: u64,
		frame: i64,
		values: &TypedBuffer,
	) -> Result<()> {
		let stride = self.write_frequencies.get(&id).copied().unwrap_or(1);
		let fs = self.current_mut_for_write()?;
		if fs.find_block(id).is_none() {
			let mut block = DataBlock::new_particle(id, name, datatype, n_values_per_frame, stride, codec_id, first_particle_number, particle_count);
			block.first_frame_number = frame - frame % stride;
			fs.blocks.push(block);
		}
		let block = fs.find_block_mut(id).expect("just inserted");
		let slot = ((frame - block.first_frame_number) / block.stride) as usize;
		block.write_frame_slot(slot, values)
	}

	/// Materialises the full stored array of block `id` from the `n`-th
	/// frame set (spec §4.9 `data_vector_get`/`particle_data_vector_get`).
	pub fn data_vector_get(&mut self, id: i64, frame_set_nr: i64) -> Result<(TypedBuffer, Shape)> {
		self.frame_set_nr_find(frame_set_nr)?;
		let fs = self.current.as_ref().expect("frame_set_nr_find populates current");
		let block = fs.find_block(id).ok_or_else(|| Error::NotFound(format!("block {id:#x}")))?;
		let shape = Shape {
			n_frames: block.n_frames.max(0) as usize,
			stride: block.stride,
			n_particles: block.particle_count.map(|c| c as usize),
			n_values_per_frame: block.n_values_per_frame as usize,
		};
		let values = if block.is_particle_dependent() {
			self.verify_mapping_closure(id)?;
			let fs = self.current.as_ref().expect("frame_set_nr_find populates current");
			let block = fs.find_block(id).expect("checked above");
			remap_local_to_global(block, &fs.mappings)?
		} else {
			block.values.clone()
		};
		Ok((values, shape))
	}

	fn verify_mapping_closure(&self, id: i64) -> Result<()> {
		let fs = self.current.as_ref().expect("caller holds a resident frame set");
		let block = fs.find_block(id).ok_or_else(|| Error::NotFound(format!("block {id:#x}")))?;
		let (Some(first), Some(count)) = (block.first_particle_number, block.particle_count) else {
			return Ok(());
		};
		for local in 0..count {
			mapping::find_owning(&fs.mappings, first + local)?;
		}
		Ok(())
	}

	/// Materialises block `id` across every frame set overlapping
	/// `[first_frame, last_frame]`, concatenating stored frames in order
	/// (spec §4.9 `data_vector_interval_get`/`particle_data_vector_interval_get`).
	pub fn data_vector_interval_get(&mut self, id: i64, first_frame: i64, last_frame: i64) -> Result<(TypedBuffer, Shape)> {
		self.frame_set_of_frame_find(first_frame)?;
		let mut collected: Option<TypedBuffer> = None;
		let mut n_frames = 0usize;
		let mut stride = 1i64;
		let mut n_particles = None;
		let mut n_values_per_frame = 0usize;

		loop {
			let fs = self.current.as_ref().expect("frame_set_of_frame_find populates current");
			if let Some(block) = fs.find_block(id) {
				stride = block.stride;
				n_particles = block.particle_count.map(|c| c as usize);
				n_values_per_frame = block.n_values_per_frame as usize;
				n_frames += block.n_frames.max(0) as usize;
				let values = if block.is_particle_dependent() {
					remap_local_to_global(block, &fs.mappings)?
				} else {
					block.values.clone()
				};
				match &mut collected {
					Some(buf) => buf.extend_from(&values)?,
					None => collected = Some(values),
				}
			}
			let next_pos = fs.header.next_pos;
			let set_last_frame = fs.header.first_frame + fs.header.frame_count - 1;
			if next_pos == NONE_POINTER || set_last_frame >= last_frame {
				break;
			}
			self.load_frame_set_at(next_pos)?;
		}

		let values = collected.ok_or_else(|| Error::NotFound(format!("block {id:#x} in [{first_frame}, {last_frame}]")))?;
		Ok((values, Shape { n_frames, stride, n_particles, n_values_per_frame }))
	}
}

/// Reorders a particle-dependent block's stored values from local particle
/// order into ascending real particle id order, per frame (spec §4.6: "Reads
/// remap local → global via the owning mapping before materialising user
/// arrays").
fn remap_local_to_global(block: &DataBlock, mappings: &[ParticleMapping]) -> Result<TypedBuffer> {
	let (Some(first), Some(count)) = (block.first_particle_number, block.particle_count) else {
		return Ok(block.values.clone());
	};
	let count = count as usize;

	let mut order = Vec::with_capacity(count);
	for local_rank in 0..count as u64 {
		let local_index = first + local_rank;
		let owner = mapping::find_owning(mappings, local_index)?;
		let global_id = owner.global(local_index).expect("find_owning guarantees this local index is covered");
		order.push((global_id, local_rank as usize));
	}
	order.sort_by_key(|&(global_id, _)| global_id);

	let n_frames = block.n_frames.max(0) as usize;
	let values_per_particle = block.n_values_per_frame as usize;
	let mut out = TypedBuffer::empty(block.datatype);
	for frame in 0..n_frames {
		for &(_, local_rank) in &order {
			let start = (frame * count + local_rank) * values_per_particle;
			out.append_slice_from(&block.values, start, values_per_particle)?;
		}
	}
	Ok(out)
}

/// Determines whether the current reader position sits exactly on another
/// `TRAJECTORY_FRAME_SET` header, without disturbing the position.
fn peek_is_frame_set(traj: &mut Trajectory, prim: &Primitives) -> Result<bool> {
	let file = traj.file_mut()?;
	let pos = file.stream_position()?;
	let result = BlockHeader::read(file, prim).map(|h| h.id == ids::TRAJECTORY_FRAME_SET).unwrap_or(false);
	traj.file_mut()?.seek(SeekFrom::Start(pos))?;
	Ok(result)
}

impl Drop for Trajectory {
	fn drop(&mut self) {
		if !matches!(self.state, State::Closed) {
			if let Err(e) = self.close() {
				log::error!("error closing trajectory on drop: {e}");
			}
		}
	}
}

/// High-level convenience calls composing the public surface with the
/// defaults the original format favors: positions/velocities through the
/// lossy codec, forces through deflate, and the restored GROMACS lambda
/// extension (spec §4.9 "High-level `util_*` calls", SPEC_FULL.md #3).
pub mod util {
	use super::*;

	pub fn positions_write(traj: &mut Trajectory, frame: i64, first_particle: u64, count: u64, values: &[f32]) -> Result<()> {
		traj.frame_particle_data_write(
			ids::TRAJ_POSITIONS,
			"POSITIONS",
			DataType::Float,
			3,
			codec::ids::XTC_LOSSY_POSITIONS,
			first_particle,
			count,
			frame,
			&TypedBuffer::Float(values.to_vec()),
		)
	}

	pub fn velocities_write(traj: &mut Trajectory, frame: i64, first_particle: u64, count: u64, values: &[f32]) -> Result<()> {
		traj.frame_particle_data_write(
			ids::TRAJ_VELOCITIES,
			"VELOCITIES",
			DataType::Float,
			3,
			codec::ids::XTC_LOSSY_POSITIONS,
			first_particle,
			count,
			frame,
			&TypedBuffer::Float(values.to_vec()),
		)
	}

	pub fn forces_write(traj: &mut Trajectory, frame: i64, first_particle: u64, count: u64, values: &[f32]) -> Result<()> {
		traj.frame_particle_data_write(
			ids::TRAJ_FORCES,
			"FORCES",
			DataType::Float,
			3,
			codec::ids::DEFLATE,
			first_particle,
			count,
			frame,
			&TypedBuffer::Float(values.to_vec()),
		)
	}

	pub fn box_shape_write(traj: &mut Trajectory, frame: i64, values: [f32; 9]) -> Result<()> {
		traj.frame_data_write(
			ids::TRAJ_BOX_SHAPE,
			"BOX SHAPE",
			DataType::Float,
			9,
			codec::ids::XTC_LOSSY_POSITIONS,
			frame,
			&TypedBuffer::Float(values.to_vec()),
		)
	}

	/// GROMACS free-energy lambda, restored from `original_source`
	/// (SPEC_FULL.md #3): one scalar double per frame, uncompressed.
	pub fn lambda_write(traj: &mut Trajectory, frame: i64, value: f64) -> Result<()> {
		traj.frame_data_write(ids::GMX_LAMBDA, "GMX LAMBDA", DataType::Double, 1, codec::ids::NONE, frame, &TypedBuffer::Double(vec![value]))
	}

	pub fn lambda_read(traj: &mut Trajectory, frame_set_nr: i64) -> Result<Vec<f64>> {
		let (values, _) = traj.data_vector_get(ids::GMX_LAMBDA, frame_set_nr)?;
		match values {
			TypedBuffer::Double(v) => Ok(v),
			_ => Err(Error::FormatViolation("GMX LAMBDA block is not double-typed".into())),
		}
	}
}
