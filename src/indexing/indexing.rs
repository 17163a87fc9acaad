use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::chunking::get_chunks;
use crate::chunking::model::{read_chunk, Chunk};
use crate::error::{ConverterError, Result};
use crate::indexing::model::ChunkOctree;
use crate::indexing::sampling::Sampler;
use crate::model::metadata::{HierarchyInfo, Metadata};
use crate::model::options::Options;
use crate::model::point::PointBuffer;
use crate::task_pool::TaskPool;
use crate::writer::{PotreeWriter, WriterConfig};

/// A chunk after its octree was built and sampled.
pub struct IndexedChunk {
	pub octree: ChunkOctree,
	/// Positions and attributes the octree's points reference.
	pub points: PointBuffer,
	/// Points the chunk root could not accept.
	pub residual: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexingSummary {
	pub chunks: usize,
	pub points: u64,
	pub nodes: usize,
	pub depth: usize,
	pub bytes: u64,
	pub spacing: f64,
	pub scale: f64,
	pub hierarchy: HierarchyInfo,
}

pub fn build_octree(chunk: &Chunk, points: &PointBuffer, store_capacity: usize, max_depth: usize) -> ChunkOctree {
	let mut octree = ChunkOctree::new(&chunk.id, chunk.bounds, store_capacity, max_depth);
	for point in &points.points {
		octree.add(*point);
	}
	octree
}

pub fn index_chunk(
	chunk: &Chunk,
	attribute_bytes: usize,
	store_capacity: usize,
	max_depth: usize,
	sampler: &Sampler,
) -> Result<IndexedChunk> {
	let points = read_chunk(&chunk.file, attribute_bytes)?;
	let mut octree = build_octree(chunk, &points, store_capacity, max_depth);
	let residual = sampler.sample_chunk(&mut octree);

	debug!(
		"indexed chunk {}: {} points, {} nodes, depth {}",
		chunk.id,
		points.len(),
		octree.len(),
		octree.depth()
	);

	Ok(IndexedChunk {
		octree,
		points,
		residual,
	})
}

/// Indexes every chunk in `<target_dir>/chunks` in parallel and writes
/// `octree.data`, `hierarchy.bin`, `hierarchy.json` and `metadata.json`.
pub fn do_indexing(target_dir: &Path, options: &Options) -> Result<IndexingSummary> {
	options.validate()?;

	let chunk_dir = target_dir.join("chunks");
	let chunks = get_chunks(&chunk_dir)?;
	let cube = chunks.cube;

	let chunk_level = chunks.grid_size.trailing_zeros() as usize;
	if options.max_depth < chunk_level {
		return Err(ConverterError::Config(format!(
			"max depth {} is below the chunk level {}",
			options.max_depth, chunk_level
		)));
	}

	let attribute_bytes: usize = chunks.attributes.iter().map(|attribute| attribute.size).sum();

	let spacing = options.spacing_for(&cube);
	let scale = options.scale_for(&cube)?;
	let sampler = Sampler::new(spacing, options.pruning);

	info!(
		"indexing {} chunks ({} points), spacing {}, scale {}",
		chunks.list.len(),
		chunks.points,
		spacing,
		scale
	);

	let writer = Arc::new(PotreeWriter::new(
		target_dir,
		WriterConfig {
			cube,
			scale,
			sampler,
			attribute_bytes,
		},
	)?);

	let mut pool = {
		let writer = Arc::clone(&writer);
		let store_capacity = options.store_capacity;
		let max_depth = options.max_depth;

		TaskPool::new("index", options.index_threads, move |chunk: Chunk| {
			let indexed = index_chunk(&chunk, attribute_bytes, store_capacity, max_depth, &sampler)
				.and_then(|indexed| {
					writer.write_chunk(&indexed.octree, &indexed.points)?;
					Ok(indexed.residual)
				});

			match indexed {
				Ok(residual) => {
					debug!("chunk {} promoted {} points", chunk.id, residual);
					Ok(())
				}
				Err(err) => Err(ConverterError::for_chunk(&chunk.id, err)),
			}
		})?
	};

	for chunk in &chunks.list {
		pool.add_task(chunk.clone())?;
	}
	pool.close()?;

	let expected: Vec<String> = chunks.list.iter().map(|chunk| chunk.id.clone()).collect();
	let written = writer.finish(&expected)?;
	if written.points != chunks.points {
		return Err(ConverterError::PointCountMismatch {
			expected: chunks.points,
			written: written.points,
		});
	}

	let hierarchy = writer.write_hierarchy(options.hierarchy_json)?;

	let metadata = Metadata::create(
		&options.name,
		&cube,
		written.points,
		hierarchy.clone(),
		scale,
		spacing,
		chunks.grid_size,
		options.encoding,
		&chunks.attributes,
	);
	metadata.write(&target_dir.join("metadata.json"))?;

	if !options.keep_chunks {
		fs::remove_dir_all(&chunk_dir)?;
		debug!("removed {}", chunk_dir.display());
	}

	info!(
		"indexed {} chunks into {} nodes, depth {}",
		chunks.list.len(),
		written.nodes,
		written.depth
	);

	Ok(IndexingSummary {
		chunks: chunks.list.len(),
		points: written.points,
		nodes: written.nodes,
		depth: written.depth,
		bytes: written.bytes,
		spacing,
		scale,
		hierarchy,
	})
}
