use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::chunking::model::{cell_index, chunk_file_name, chunk_name, encode_records, ChunkPiece};
use crate::error::{ConverterError, Result};
use crate::model::attributes::Attributes;
use crate::model::bounds::BoundingBox;
use crate::model::metadata::ChunkingMetadata;
use crate::model::point::{PointBatch, PointBuffer};
use crate::task_pool::TaskPool;

const LONG_LOCK_WAIT: Duration = Duration::from_millis(200);

/// One lock per chunk file, created on first use.
#[derive(Default)]
pub struct FileLocks {
	table: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
}

impl FileLocks {
	pub fn lock_for(&self, index: usize) -> Arc<Mutex<()>> {
		let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
		Arc::clone(table.entry(index).or_default())
	}
}

/// Appends the records of one piece to its chunk file.
pub fn flush_piece(piece: ChunkPiece, locks: &FileLocks) -> Result<()> {
	let data = encode_records(&piece.points)?;
	drop(piece.points);

	let file_lock = locks.lock_for(piece.index);

	let wait_start = Instant::now();
	let _guard = file_lock.lock().unwrap_or_else(PoisonError::into_inner);
	let waited = wait_start.elapsed();
	if waited > LONG_LOCK_WAIT {
		warn!(
			"long lock duration ({:.3}s) while waiting to write to {}",
			waited.as_secs_f64(),
			piece.name
		);
	}

	let mut file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(&piece.path)?;
	file.write_all(&data)?;

	debug!("flushed {} bytes to {}", data.len(), piece.name);

	Ok(())
}

pub struct ChunkingSummary {
	pub points: u64,
	pub chunks: usize,
}

/// Buckets a stream of points into the cells of a regular grid over the cube,
/// spilling full cells to `chunk_<id>.bin` files through a flush pool.
pub struct Chunker {
	path: PathBuf,
	cube: BoundingBox,
	grid_size: usize,
	flush_threshold: usize,
	attributes: Attributes,

	cells: HashMap<usize, PointBuffer>,
	used_cells: BTreeSet<usize>,
	points_added: u64,

	flush_pool: TaskPool<ChunkPiece>,
}

impl Chunker {
	pub fn new(
		path: &Path,
		attributes: Attributes,
		cube: BoundingBox,
		grid_size: usize,
		flush_threshold: usize,
		num_threads: usize,
	) -> Result<Chunker> {
		cube.validate()?;
		if grid_size == 0 || !grid_size.is_power_of_two() {
			return Err(ConverterError::Config(format!(
				"grid size must be a power of two, got {}",
				grid_size
			)));
		}

		fs::create_dir_all(path)?;
		for entry in fs::read_dir(path)? {
			let entry = entry?;
			if entry.file_type()?.is_file() {
				fs::remove_file(entry.path())?;
			}
		}

		let locks = Arc::new(FileLocks::default());
		let flush_pool = TaskPool::new("flush", num_threads, move |piece: ChunkPiece| {
			let name = piece.name.clone();
			flush_piece(piece, &locks).map_err(|err| ConverterError::for_chunk(&name, err))
		})?;

		Ok(Chunker {
			path: path.to_path_buf(),
			cube,
			grid_size,
			flush_threshold,
			attributes,
			cells: HashMap::new(),
			used_cells: BTreeSet::new(),
			points_added: 0,
			flush_pool,
		})
	}

	pub fn add(&mut self, batch: &PointBatch) -> Result<()> {
		if batch.attribute_bytes != self.attributes.bytes {
			return Err(ConverterError::Config(format!(
				"batch carries {} attribute bytes per point, expected {}",
				batch.attribute_bytes, self.attributes.bytes
			)));
		}

		let indices: Vec<usize> = batch
			.points
			.iter()
			.map(|point| cell_index(&point.position, &self.cube, self.grid_size))
			.collect();

		let mut counts: HashMap<usize, usize> = HashMap::new();
		for index in &indices {
			*counts.entry(*index).or_insert(0) += 1;
		}

		let attribute_bytes = self.attributes.bytes;
		for (point, index) in batch.points.iter().zip(&indices) {
			let cell = self
				.cells
				.entry(*index)
				.or_insert_with(|| PointBuffer::with_capacity(attribute_bytes, counts[index]));
			cell.push(point.position, batch.attributes_of(point));
		}

		self.points_added += batch.len() as u64;

		let mut touched: Vec<usize> = counts.into_keys().collect();
		touched.sort_unstable();
		for index in touched {
			self.used_cells.insert(index);

			let exceeded = self
				.cells
				.get(&index)
				.map_or(false, |cell| cell.len() > self.flush_threshold);
			if exceeded {
				self.flush_cell(index)?;
			}
		}

		Ok(())
	}

	fn flush_cell(&mut self, index: usize) -> Result<()> {
		let points = match self.cells.remove(&index) {
			Some(points) if !points.is_empty() => points,
			_ => return Ok(()),
		};

		let name = chunk_name(index, self.grid_size);
		let path = self.path.join(chunk_file_name(&name));

		self.flush_pool.add_task(ChunkPiece {
			index,
			name,
			path,
			points,
		})
	}

	pub fn metadata(&self) -> ChunkingMetadata {
		ChunkingMetadata {
			min: self.cube.min.to_array(),
			max: self.cube.max.to_array(),
			attributes: self.attributes.list.clone(),
			points: self.points_added,
			grid_size: Some(self.grid_size),
		}
	}

	/// Flushes every non-empty cell, writes `metadata.json` and waits for all
	/// pending flushes to land on disk.
	pub fn close(mut self) -> Result<ChunkingSummary> {
		let mut remaining: Vec<usize> = self.cells.keys().copied().collect();
		remaining.sort_unstable();
		for index in remaining {
			self.flush_cell(index)?;
		}

		self.metadata().write(&self.path.join("metadata.json"))?;

		let flushes = self.flush_pool.close()?;

		info!(
			"chunked {} points into {} chunks ({} flushes)",
			self.points_added,
			self.used_cells.len(),
			flushes
		);

		Ok(ChunkingSummary {
			points: self.points_added,
			chunks: self.used_cells.len(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chunking::get_chunks;
	use crate::chunking::model::read_chunk;
	use crate::model::attributes::{Attribute, AttributeType};
	use crate::model::vector3::Vector3;
	use rand::prelude::*;

	fn cube() -> BoundingBox {
		BoundingBox::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 10.0, 10.0))
	}

	fn random_batch(rng: &mut StdRng, count: usize, first_id: u32) -> PointBatch {
		let mut batch = PointBuffer::new(4);
		for i in 0..count {
			let id = first_id + i as u32;
			batch.push(
				Vector3::new(
					rng.gen_range(0.0..10.0),
					rng.gen_range(0.0..10.0),
					rng.gen_range(0.0..10.0),
				),
				&id.to_le_bytes(),
			);
		}
		batch
	}

	fn attributes() -> Attributes {
		Attributes::from_attributes(vec![Attribute::new("id", AttributeType::Uint32, 1)])
	}

	fn chunk_contents(dir: &Path) -> Vec<(String, Vec<(u32, [u64; 3])>)> {
		let chunks = get_chunks(dir).unwrap();
		chunks
			.list
			.iter()
			.map(|chunk| {
				let points = read_chunk(&chunk.file, 4).unwrap();
				let mut records: Vec<(u32, [u64; 3])> = points
					.points
					.iter()
					.map(|p| {
						let bytes = points.attributes_of(p);
						let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
						(id, p.position.to_array().map(f64::to_bits))
					})
					.collect();
				records.sort();
				(chunk.id.clone(), records)
			})
			.collect()
	}

	#[test]
	fn every_point_lands_in_its_cell_file() {
		let dir = tempfile::tempdir().unwrap();
		let mut rng = StdRng::seed_from_u64(7);

		let mut chunker = Chunker::new(dir.path(), attributes(), cube(), 4, 50, 3).unwrap();
		let mut total = 0;
		for b in 0..5 {
			let batch = random_batch(&mut rng, 400, b * 400);
			total += batch.len();
			chunker.add(&batch).unwrap();
		}
		let summary = chunker.close().unwrap();
		assert_eq!(summary.points, total as u64);

		let chunks = get_chunks(dir.path()).unwrap();
		assert_eq!(chunks.points, total as u64);
		assert_eq!(chunks.list.len(), summary.chunks);

		let mut seen = vec![false; total];
		for chunk in &chunks.list {
			let points = read_chunk(&chunk.file, 4).unwrap();
			for point in &points.points {
				assert!(chunk.bounds.contains(&point.position));

				let bytes = points.attributes_of(point);
				let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
				assert!(!seen[id], "point {} written twice", id);
				seen[id] = true;
			}
		}
		assert!(seen.iter().all(|s| *s));
	}

	#[test]
	fn assignment_is_deterministic() {
		let first = tempfile::tempdir().unwrap();
		let second = tempfile::tempdir().unwrap();

		for (dir, threshold) in [(first.path(), 10), (second.path(), 1_000)] {
			let mut rng = StdRng::seed_from_u64(99);
			let mut chunker = Chunker::new(dir, attributes(), cube(), 8, threshold, 4).unwrap();
			for b in 0..3 {
				chunker.add(&random_batch(&mut rng, 300, b * 300)).unwrap();
			}
			chunker.close().unwrap();
		}

		assert_eq!(chunk_contents(first.path()), chunk_contents(second.path()));
	}

	#[test]
	fn rejects_degenerate_setup() {
		let dir = tempfile::tempdir().unwrap();
		let flat = BoundingBox::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0));
		assert!(Chunker::new(dir.path(), attributes(), flat, 4, 10, 1).is_err());
		assert!(Chunker::new(dir.path(), attributes(), cube(), 3, 10, 1).is_err());

		let mut chunker = Chunker::new(dir.path(), attributes(), cube(), 2, 10, 1).unwrap();
		let wrong = PointBuffer::new(2);
		assert!(chunker.add(&wrong).is_err());
		chunker.close().unwrap();
	}

	#[test]
	fn concurrent_flushes_of_one_cell_do_not_interleave() {
		let dir = tempfile::tempdir().unwrap();
		let locks = Arc::new(FileLocks::default());
		let path = dir.path().join(chunk_file_name("r"));

		let mut pool = {
			let locks = Arc::clone(&locks);
			TaskPool::new("flush-test", 8, move |piece: ChunkPiece| flush_piece(piece, &locks)).unwrap()
		};

		let mut expected = 0;
		for i in 0..64u32 {
			let mut points = PointBuffer::new(4);
			for j in 0..100u32 {
				let v = f64::from(i * 100 + j);
				points.push(Vector3::new(v, v, v), &(i * 100 + j).to_le_bytes());
			}
			expected += points.len();
			pool.add_task(ChunkPiece {
				index: 0,
				name: "r".to_string(),
				path: path.clone(),
				points,
			})
			.unwrap();
		}
		assert_eq!(pool.close().unwrap(), 64);

		let points = read_chunk(&path, 4).unwrap();
		assert_eq!(points.len(), expected);
		for point in &points.points {
			let bytes = points.attributes_of(point);
			let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
			assert_eq!(point.position.x, f64::from(id));
		}
	}
}
