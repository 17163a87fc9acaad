//! Merges finished chunk octrees into one global octree.
//!
//! Every node payload lands in the shared `octree.data` file, whose offset
//! counter and the global node table live behind a single lock. Payload bytes
//! are always encoded before the lock is taken, so a critical section only
//! stamps offsets and copies one buffer. Once every chunk is in, the levels
//! above the chunk grid are sampled from the points promoted past the chunk
//! roots and the hierarchy index is written.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::error::{ConverterError, Result};
use crate::indexing::model::ChunkOctree;
use crate::indexing::sampling::Sampler;
use crate::model::bounds::BoundingBox;
use crate::model::metadata::HierarchyInfo;
use crate::model::point::{Point, PointBuffer};
use crate::writer::hierarchy::{GlobalHierarchy, NodeState, RECORD_SIZE};
use crate::writer::sink::OctreeSink;

pub mod hierarchy;
pub mod sink;

/// 3 x i32 quantized position ahead of the attribute bytes.
pub const QUANTIZED_POSITION_BYTES: usize = 3 * 4;

const LONG_LOCK_DURATION: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug)]
pub struct WriterConfig {
	pub cube: BoundingBox,
	pub scale: f64,
	pub sampler: Sampler,
	pub attribute_bytes: usize,
}

impl WriterConfig {
	pub fn bytes_per_point(&self) -> usize {
		QUANTIZED_POSITION_BYTES + self.attribute_bytes
	}
}

struct WriterState {
	sink: OctreeSink,
	hierarchy: GlobalHierarchy,
	/// Points rejected by a chunk root, keyed by the node that receives them.
	promoted: HashMap<String, PointBuffer>,
	completed: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriterSummary {
	pub points: u64,
	pub nodes: usize,
	pub depth: usize,
	pub bytes: u64,
}

/// One node's payload, encoded off-lock.
struct EncodedNode {
	name: String,
	num_points: u64,
	start: usize,
	len: usize,
}

pub struct PotreeWriter {
	directory: PathBuf,
	config: WriterConfig,
	state: Mutex<WriterState>,
}

impl PotreeWriter {
	pub fn new(directory: &Path, config: WriterConfig) -> Result<PotreeWriter> {
		fs::create_dir_all(directory)?;
		let sink = OctreeSink::create(&directory.join("octree.data"))?;
		Ok(PotreeWriter::with_sink(directory, config, sink))
	}

	pub fn with_sink(directory: &Path, config: WriterConfig, sink: OctreeSink) -> PotreeWriter {
		PotreeWriter {
			directory: directory.to_path_buf(),
			config,
			state: Mutex::new(WriterState {
				sink,
				hierarchy: GlobalHierarchy::new(),
				promoted: HashMap::new(),
				completed: BTreeSet::new(),
			}),
		}
	}

	pub fn config(&self) -> &WriterConfig {
		&self.config
	}

	fn lock_state(&self, purpose: &str) -> MutexGuard<'_, WriterState> {
		let wait_start = Instant::now();
		let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

		let waited = wait_start.elapsed();
		if waited > LONG_LOCK_DURATION {
			warn!(
				"long lock duration ({:.3}s) while waiting to {}",
				waited.as_secs_f64(),
				purpose
			);
		}

		state
	}

	fn report_hold(purpose: &str, held: Duration) {
		if held > LONG_LOCK_DURATION {
			warn!(
				"writer lock held for {:.3}s to {}",
				held.as_secs_f64(),
				purpose
			);
		}
	}

	/// Quantized record of every point in `points`, appended to `out`.
	pub fn encode_points(&self, source: &PointBuffer, points: &[Point], out: &mut Vec<u8>) -> Result<()> {
		let min = self.config.cube.min;
		let scale = self.config.scale;
		out.reserve(points.len() * self.config.bytes_per_point());

		for point in points {
			let position = point.position;
			out.write_i32::<LittleEndian>(((position.x - min.x) / scale).round() as i32)?;
			out.write_i32::<LittleEndian>(((position.y - min.y) / scale).round() as i32)?;
			out.write_i32::<LittleEndian>(((position.z - min.z) / scale).round() as i32)?;
			out.extend_from_slice(source.attributes_of(point));
		}

		Ok(())
	}

	/// Writes the accepted points of every node of a sampled chunk octree and
	/// queues the chunk root's rejects for the levels above.
	///
	/// `source` holds the attributes the octree's points reference.
	pub fn write_chunk(&self, octree: &ChunkOctree, source: &PointBuffer) -> Result<()> {
		let root = octree.node(octree.root());
		let chunk_id = root.name.clone();
		let is_global_root = root.level() == 0;

		let mut buffer = Vec::new();
		let mut nodes = Vec::with_capacity(octree.len());
		for id in octree.preorder() {
			let node = octree.node(id);
			let start = buffer.len();
			self.encode_points(source, &node.points, &mut buffer)?;

			let mut num_points = node.points.len() as u64;
			if is_global_root && id == octree.root() {
				// nothing above the global root, its leftovers stay with it
				self.encode_points(source, &node.store, &mut buffer)?;
				num_points += node.store.len() as u64;
			}

			nodes.push(EncodedNode {
				name: node.name.clone(),
				num_points,
				start,
				len: buffer.len() - start,
			});
		}

		let mut residual = PointBuffer::with_capacity(source.attribute_bytes, root.store.len());
		if !is_global_root {
			residual.extend_from(source, &root.store);
		}

		let mut state = self.lock_state("write chunk");
		let hold_start = Instant::now();

		if state.completed.contains(&chunk_id) {
			return Err(ConverterError::DuplicateNode(chunk_id));
		}

		let mut indices = Vec::with_capacity(nodes.len());
		for node in &nodes {
			let index = state.hierarchy.find_or_create(&node.name)?;
			if state.hierarchy.node(index).state == NodeState::Written {
				return Err(ConverterError::DuplicateNode(node.name.clone()));
			}
			indices.push(index);
		}

		// offsets are only stamped once the payload is on disk
		let base = state.sink.append(&buffer)?;
		for (node, index) in nodes.iter().zip(indices) {
			state
				.hierarchy
				.assign(index, base + node.start as u64, node.len as u64, node.num_points)?;
		}

		if !residual.is_empty() {
			let parent = chunk_id[..chunk_id.len() - 1].to_string();
			let attribute_bytes = residual.attribute_bytes;
			state
				.promoted
				.entry(parent)
				.or_insert_with(|| PointBuffer::new(attribute_bytes))
				.append(&residual);
		}
		state.completed.insert(chunk_id.clone());

		let held = hold_start.elapsed();
		drop(state);
		PotreeWriter::report_hold("write chunk", held);

		debug!(
			"wrote chunk {}: {} nodes, {} bytes, {} promoted",
			chunk_id,
			nodes.len(),
			buffer.len(),
			residual.len()
		);

		Ok(())
	}

	/// Checks that every expected chunk arrived, then samples and writes the
	/// levels above the chunk roots, children before parents.
	pub fn finish(&self, expected_chunks: &[String]) -> Result<WriterSummary> {
		let mut state = self.lock_state("finish");
		let hold_start = Instant::now();

		let missing: Vec<String> = expected_chunks
			.iter()
			.filter(|id| !state.completed.contains(*id))
			.cloned()
			.collect();
		if !missing.is_empty() {
			return Err(ConverterError::MissingChunks(missing));
		}

		let attribute_bytes = self.config.attribute_bytes;
		let sampler = self.config.sampler;

		for index in state.hierarchy.postorder() {
			let node = state.hierarchy.node(index);
			if node.state == NodeState::Written {
				continue;
			}

			let name = node.name.clone();
			let level = node.level();
			let candidates = state
				.promoted
				.remove(&name)
				.unwrap_or_else(|| PointBuffer::new(attribute_bytes));

			let center = self.config.cube.of_node(&name)?.center();
			let selection = sampler.select(candidates.points.clone(), &center, sampler.spacing_at(level));

			let mut payload = selection.accepted;
			if level == 0 {
				payload.extend(selection.rejected);
			} else if !selection.rejected.is_empty() {
				let parent = name[..name.len() - 1].to_string();
				state
					.promoted
					.entry(parent)
					.or_insert_with(|| PointBuffer::new(attribute_bytes))
					.extend_from(&candidates, &selection.rejected);
			}

			let mut data = Vec::new();
			self.encode_points(&candidates, &payload, &mut data)?;
			let offset = state.sink.append(&data)?;
			state
				.hierarchy
				.assign(index, offset, data.len() as u64, payload.len() as u64)?;
		}

		if let Some(name) = state.promoted.keys().next() {
			return Err(ConverterError::UnknownNode(name.clone()));
		}

		state.sink.sync()?;

		let summary = WriterSummary {
			points: state.hierarchy.total_points(),
			nodes: state.hierarchy.len(),
			depth: state.hierarchy.depth(),
			bytes: state.sink.bytes_written(),
		};

		let held = hold_start.elapsed();
		drop(state);
		PotreeWriter::report_hold("finish", held);

		info!(
			"wrote {} points in {} nodes, {} bytes",
			summary.points, summary.nodes, summary.bytes
		);

		Ok(summary)
	}

	/// Writes `hierarchy.bin` and optionally the `hierarchy.json` mirror.
	pub fn write_hierarchy(&self, json: bool) -> Result<HierarchyInfo> {
		let state = self.lock_state("write hierarchy");

		let pending = state.hierarchy.pending();
		if let Some(name) = pending.first() {
			return Err(ConverterError::UnknownNode(name.to_string()));
		}

		let buffer = state.hierarchy.encode()?;
		fs::write(self.directory.join("hierarchy.bin"), &buffer)?;

		if json {
			let root = state.hierarchy.to_json();
			let mut file = BufWriter::new(File::create(self.directory.join("hierarchy.json"))?);
			serde_json::to_writer_pretty(&mut file, &root)?;
			file.flush()?;
		}

		Ok(HierarchyInfo {
			depth: state.hierarchy.depth() as u32,
			nodes: state.hierarchy.len() as u64,
			record_size: RECORD_SIZE as u32,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::vector3::Vector3;
	use crate::reader::octree_reader::OctreeReader;
	use rand::prelude::*;
	use std::sync::Arc;
	use std::thread;

	fn cube() -> BoundingBox {
		BoundingBox::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(8.0, 8.0, 8.0))
	}

	fn config(attribute_bytes: usize) -> WriterConfig {
		WriterConfig {
			cube: cube(),
			scale: 0.001,
			sampler: Sampler::new(cube().diagonal() / 10.0, true),
			attribute_bytes,
		}
	}

	/// Builds and samples the octree of chunk `id` from random points inside its box.
	fn sampled_chunk(id: &str, count: usize, seed: u64) -> (ChunkOctree, PointBuffer) {
		let bounds = cube().of_node(id).unwrap();
		let size = bounds.size();
		let mut rng = StdRng::seed_from_u64(seed);

		let mut source = PointBuffer::new(2);
		for i in 0..count {
			let position = Vector3::new(
				bounds.min.x + rng.gen::<f64>() * size.x,
				bounds.min.y + rng.gen::<f64>() * size.y,
				bounds.min.z + rng.gen::<f64>() * size.z,
			);
			source.push(position, &(i as u16).to_le_bytes());
		}

		let mut octree = ChunkOctree::new(id, bounds, 40, 12);
		for point in &source.points {
			octree.add(*point);
		}
		config(2).sampler.sample_chunk(&mut octree);

		(octree, source)
	}

	#[test]
	fn merges_chunks_without_overlap() {
		let dir = tempfile::tempdir().unwrap();
		let writer = Arc::new(PotreeWriter::new(dir.path(), config(2)).unwrap());
		let ids: Vec<String> = (0..8).map(|i| format!("r{}", i)).collect();

		let handles: Vec<_> = ids
			.iter()
			.enumerate()
			.map(|(i, id)| {
				let writer = Arc::clone(&writer);
				let id = id.clone();
				thread::spawn(move || {
					let (octree, source) = sampled_chunk(&id, 300 + i * 50, i as u64);
					writer.write_chunk(&octree, &source).unwrap();
				})
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}

		let summary = writer.finish(&ids).unwrap();
		let expected: u64 = (0..8).map(|i| 300 + i * 50).sum();
		assert_eq!(summary.points, expected);

		let info = writer.write_hierarchy(true).unwrap();
		assert_eq!(info.nodes as usize, summary.nodes);
		assert_eq!(info.record_size, 32);

		let reader = OctreeReader::open(dir.path(), 2).unwrap();
		let mut ranges: Vec<(u64, u64)> = reader
			.records()
			.iter()
			.map(|record| (record.byte_offset, record.byte_size))
			.collect();
		ranges.sort();
		for pair in ranges.windows(2) {
			assert!(pair[0].0 + pair[0].1 <= pair[1].0);
		}
		let (last_offset, last_size) = ranges[ranges.len() - 1];
		let data_len = fs::metadata(dir.path().join("octree.data")).unwrap().len();
		assert_eq!(last_offset + last_size, data_len);
		assert_eq!(data_len, summary.bytes);
		assert_eq!(reader.total_points(), expected);
		assert!(dir.path().join("hierarchy.json").exists());
	}

	#[test]
	fn reports_missing_chunks() {
		let dir = tempfile::tempdir().unwrap();
		let writer = PotreeWriter::new(dir.path(), config(2)).unwrap();

		let (octree, source) = sampled_chunk("r3", 100, 1);
		writer.write_chunk(&octree, &source).unwrap();

		let expected = vec!["r3".to_string(), "r5".to_string()];
		match writer.finish(&expected) {
			Err(ConverterError::MissingChunks(ids)) => assert_eq!(ids, vec!["r5".to_string()]),
			other => panic!("unexpected result {:?}", other),
		}
	}

	#[test]
	fn failed_append_leaves_nodes_unwritten() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("octree.data");
		fs::write(&path, []).unwrap();

		let sink = OctreeSink::from_file(&path, File::open(&path).unwrap()).unwrap();
		let writer = PotreeWriter::with_sink(dir.path(), config(2), sink);

		let (octree, source) = sampled_chunk("r3", 100, 1);
		assert!(writer.write_chunk(&octree, &source).is_err());

		{
			let state = writer.lock_state("test");
			assert_eq!(state.sink.bytes_written(), 0);
			assert!(state.completed.is_empty());
			for index in 0..state.hierarchy.len() {
				assert_eq!(state.hierarchy.node(index).state, NodeState::Pending);
			}
		}

		match writer.finish(&["r3".to_string()]) {
			Err(ConverterError::MissingChunks(ids)) => assert_eq!(ids, vec!["r3".to_string()]),
			other => panic!("unexpected result {:?}", other),
		}
	}

	#[test]
	fn rejects_a_chunk_written_twice() {
		let dir = tempfile::tempdir().unwrap();
		let writer = PotreeWriter::new(dir.path(), config(2)).unwrap();

		let (octree, source) = sampled_chunk("r12", 50, 2);
		writer.write_chunk(&octree, &source).unwrap();
		assert!(matches!(
			writer.write_chunk(&octree, &source),
			Err(ConverterError::DuplicateNode(_))
		));
	}

	#[test]
	fn global_root_chunk_keeps_its_leftovers() {
		let dir = tempfile::tempdir().unwrap();
		let writer = PotreeWriter::new(dir.path(), config(2)).unwrap();

		let (octree, source) = sampled_chunk("r", 2_000, 3);
		let root = octree.node(octree.root());
		let root_points = (root.points.len() + root.store.len()) as u64;
		writer.write_chunk(&octree, &source).unwrap();

		let summary = writer.finish(&["r".to_string()]).unwrap();
		assert_eq!(summary.points, 2_000);

		writer.write_hierarchy(false).unwrap();
		let reader = OctreeReader::open(dir.path(), 2).unwrap();
		assert_eq!(reader.records()[0].num_points(2), root_points);
		assert!(!dir.path().join("hierarchy.json").exists());
	}

	#[test]
	fn quantizes_relative_to_the_cube() {
		let dir = tempfile::tempdir().unwrap();
		let writer = PotreeWriter::new(dir.path(), config(1)).unwrap();

		let mut source = PointBuffer::new(1);
		source.push(Vector3::new(1.0, 2.5, 7.9996), &[42]);

		let mut out = Vec::new();
		writer.encode_points(&source, &source.points, &mut out).unwrap();

		let mut expected = Vec::new();
		for value in [1000i32, 2500, 8000] {
			expected.extend_from_slice(&value.to_le_bytes());
		}
		expected.push(42);
		assert_eq!(out, expected);
	}
}
