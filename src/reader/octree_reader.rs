use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{ConverterError, Result};
use crate::model::metadata::Metadata;
use crate::model::vector3::Vector3;
use crate::writer::hierarchy::RECORD_SIZE;
use crate::writer::QUANTIZED_POSITION_BYTES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HierarchyRecord {
	pub byte_offset: u64,
	pub byte_size: u64,
	pub child_position: u64,
	pub child_mask: u8,
}

impl HierarchyRecord {
	pub fn num_points(&self, attribute_bytes: usize) -> u64 {
		self.byte_size / (QUANTIZED_POSITION_BYTES + attribute_bytes) as u64
	}
}

pub fn decode_hierarchy(data: &[u8]) -> Result<Vec<HierarchyRecord>> {
	let mut records = Vec::with_capacity(data.len() / RECORD_SIZE);

	let mut rdr = Cursor::new(data);
	while rdr.position() < data.len() as u64 {
		let record = HierarchyRecord {
			byte_offset: rdr.read_u64::<LittleEndian>()?,
			byte_size: rdr.read_u64::<LittleEndian>()?,
			child_position: rdr.read_u64::<LittleEndian>()?,
			child_mask: rdr.read_u8()?,
		};
		rdr.set_position(rdr.position() + 7);

		records.push(record);
	}

	Ok(records)
}

/// Reads back an octree written by the converter.
pub struct OctreeReader {
	data_path: PathBuf,
	attribute_bytes: usize,
	records: Vec<HierarchyRecord>,
	names: Vec<String>,
	metadata: Option<Metadata>,
}

impl OctreeReader {
	pub fn open(directory: &Path, attribute_bytes: usize) -> Result<OctreeReader> {
		let hierarchy_path = directory.join("hierarchy.bin");
		let data = fs::read(&hierarchy_path)?;
		if data.len() % RECORD_SIZE != 0 {
			return Err(ConverterError::CorruptChunk {
				path: hierarchy_path.display().to_string(),
				len: data.len() as u64,
				record_size: RECORD_SIZE,
			});
		}

		let records = decode_hierarchy(&data)?;
		let names = node_names(&records)?;

		Ok(OctreeReader {
			data_path: directory.join("octree.data"),
			attribute_bytes,
			records,
			names,
			metadata: None,
		})
	}

	/// Opens the octree described by `metadata.json` in `directory`.
	pub fn from_metadata(directory: &Path) -> Result<OctreeReader> {
		let metadata = Metadata::read(&directory.join("metadata.json"))?;
		let attribute_bytes = metadata
			.attributes
			.iter()
			.filter(|attribute| attribute.name != "position")
			.map(|attribute| attribute.size)
			.sum();

		let mut reader = OctreeReader::open(directory, attribute_bytes)?;
		reader.metadata = Some(metadata);
		Ok(reader)
	}

	pub fn records(&self) -> &[HierarchyRecord] {
		&self.records
	}

	/// Node names, parallel to `records`.
	pub fn names(&self) -> &[String] {
		&self.names
	}

	pub fn record(&self, name: &str) -> Option<&HierarchyRecord> {
		let index = self.names.iter().position(|n| n == name)?;
		self.records.get(index)
	}

	pub fn metadata(&self) -> Option<&Metadata> {
		self.metadata.as_ref()
	}

	pub fn total_points(&self) -> u64 {
		self.records
			.iter()
			.map(|record| record.num_points(self.attribute_bytes))
			.sum()
	}

	/// Quantized positions and attribute bytes of one node.
	pub fn read_node(&self, record: &HierarchyRecord) -> Result<Vec<([i32; 3], Vec<u8>)>> {
		let mut file = File::open(&self.data_path)?;
		let len = file.metadata()?.len();
		let end = record.byte_offset.checked_add(record.byte_size);
		if end.map_or(true, |end| end > len) {
			return Err(ConverterError::NodeOutOfRange {
				offset: record.byte_offset,
				size: record.byte_size,
				len,
			});
		}
		file.seek(SeekFrom::Start(record.byte_offset))?;

		let mut data = vec![0u8; record.byte_size as usize];
		file.read_exact(&mut data)?;

		let record_size = QUANTIZED_POSITION_BYTES + self.attribute_bytes;
		let mut points = Vec::with_capacity(data.len() / record_size);
		for chunk in data.chunks_exact(record_size) {
			let mut rdr = Cursor::new(chunk);
			let position = [
				rdr.read_i32::<LittleEndian>()?,
				rdr.read_i32::<LittleEndian>()?,
				rdr.read_i32::<LittleEndian>()?,
			];
			points.push((position, chunk[QUANTIZED_POSITION_BYTES..].to_vec()));
		}

		Ok(points)
	}

	/// Positions of one node in source coordinates. Needs `metadata.json`.
	pub fn read_positions(&self, record: &HierarchyRecord) -> Result<Vec<Vector3>> {
		let metadata = self
			.metadata
			.as_ref()
			.ok_or_else(|| ConverterError::Config("octree opened without metadata".to_string()))?;

		let offset = Vector3::from_array(metadata.offset);
		let scale = Vector3::from_array(metadata.scale);

		Ok(self
			.read_node(record)?
			.into_iter()
			.map(|([x, y, z], _)| {
				Vector3::new(f64::from(x), f64::from(y), f64::from(z)) * scale + offset
			})
			.collect())
	}
}

/// Rebuilds node names from the child masks of a breadth-first record list.
fn node_names(records: &[HierarchyRecord]) -> Result<Vec<String>> {
	let mut names: Vec<Option<String>> = vec![None; records.len()];
	if let Some(root) = names.first_mut() {
		*root = Some("r".to_string());
	}

	for (i, record) in records.iter().enumerate() {
		let name = names[i]
			.clone()
			.ok_or_else(|| ConverterError::UnknownNode(format!("record {}", i)))?;

		let mut child = record.child_position as usize;
		for octant in 0..8 {
			if record.child_mask & (1 << octant) == 0 {
				continue;
			}

			let slot = names
				.get_mut(child)
				.ok_or_else(|| ConverterError::UnknownNode(format!("{}{}", name, octant)))?;
			*slot = Some(format!("{}{}", name, octant));
			child += 1;
		}
	}

	names
		.into_iter()
		.enumerate()
		.map(|(i, name)| name.ok_or_else(|| ConverterError::UnknownNode(format!("record {}", i))))
		.collect()
}
