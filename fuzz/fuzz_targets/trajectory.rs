#![no_main]

use std::io::{Cursor, Read};

use libfuzzer_sys::fuzz_target;
use tng::block::{ids, BlockHeader};
use tng::codec::CodecRegistry;
use tng::data_block::DataBlock;
use tng::endian::{FileEndianness, Primitives};
use tng::frameset::FrameSetHeader;
use tng::hash::HashMode;
use tng::mapping::ParticleMapping;
use tng::topology::Topology;

fuzz_target!(|data: Vec<u8>| {
	if data.is_empty() {
		return;
	}
	let prim = Primitives::new(if data[0] & 1 == 0 { FileEndianness::Little } else { FileEndianness::Big });
	let mut cursor = Cursor::new(&data[1..]);
	let codecs = CodecRegistry::new();

	// GENERAL INFO and MOLECULES are mandatory and precede everything else;
	// malformed input already detected and handled properly by the engine
	// (a header/body parse error just ends the run).
	for _ in 0..2 {
		let Some(body) = read_one(&mut cursor, &prim) else { return };
		let _ = Topology::read(&mut body.as_slice(), &prim);
	}

	loop {
		let pos_before = cursor.position();
		let Ok(header) = BlockHeader::read(&mut cursor, &prim) else { break };
		let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
		if header.body_len() > remaining {
			break;
		}
		let mut body = vec![0u8; header.body_len()];
		if cursor.read_exact(&mut body).is_err() {
			break;
		}
		let _ = header.verify(&body, HashMode::Use);

		match header.id {
			ids::TRAJECTORY_FRAME_SET => {
				let _ = FrameSetHeader::read(&mut body.as_slice(), &prim);
			}
			ids::PARTICLE_MAPPING => {
				let _ = ParticleMapping::read(&mut body.as_slice(), &prim, body.len());
			}
			_ => {
				let _ = DataBlock::read_body(&mut body.as_slice(), &prim, &codecs, header.id, header.name.clone(), header.body_len());
			}
		}

		if cursor.position() == pos_before {
			break;
		}
	}
});

/// Reads one header + body pair, bounding the body allocation by the bytes
/// actually remaining so a crafted `size` field can't force an unbounded
/// allocation.
fn read_one(cursor: &mut Cursor<&[u8]>, prim: &Primitives) -> Option<Vec<u8>> {
	let header = BlockHeader::read(cursor, prim).ok()?;
	let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
	if header.body_len() > remaining {
		return None;
	}
	let mut body = vec![0u8; header.body_len()];
	cursor.read_exact(&mut body).ok()?;
	Some(body)
}
