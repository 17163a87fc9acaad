use std::fs;
use std::path::Path;

use crate::chunking::model::{chunk_id_of, Chunk, Chunks};
use crate::error::Result;
use crate::model::metadata::ChunkingMetadata;

pub mod chunker;
pub mod model;

/// Lists the chunk files written by a `Chunker` into `chunk_directory`,
/// deriving every chunk's box from its id.
pub fn get_chunks(chunk_directory: &Path) -> Result<Chunks> {
	let metadata = ChunkingMetadata::read(&chunk_directory.join("metadata.json"))?;
	let cube = metadata.cube();
	cube.validate()?;

	let mut list = Vec::new();
	for entry in fs::read_dir(chunk_directory)? {
		let entry = entry?;
		let file_name = entry.file_name().to_string_lossy().to_string();

		let id = match chunk_id_of(&file_name) {
			Some(id) => id.to_string(),
			None => continue,
		};

		list.push(Chunk {
			bounds: cube.of_node(&id)?,
			id,
			file: entry.path(),
		});
	}

	list.sort_by(|a, b| a.id.cmp(&b.id));

	// older chunk directories carry no grid size, the id length gives it away
	let grid_size = metadata.grid_size.unwrap_or_else(|| {
		let levels = list.iter().map(|chunk| chunk.id.len() - 1).max().unwrap_or(0);
		1 << levels
	});

	Ok(Chunks {
		list,
		cube,
		attributes: metadata.attributes,
		points: metadata.points,
		grid_size,
	})
}
