use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::attributes::Attribute;
use crate::model::bounds::BoundingBox;
use crate::model::options::Encoding;
use crate::model::vector3::Vector3;

/// `chunks/metadata.json`, written by the partitioner once all cells are flushed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChunkingMetadata {
	pub min: [f64; 3],
	pub max: [f64; 3],
	#[serde(default)]
	pub attributes: Vec<Attribute>,
	#[serde(default)]
	pub points: u64,
	/// Cells per axis the chunks were partitioned with.
	#[serde(default, rename = "gridSize")]
	pub grid_size: Option<usize>,
}

impl ChunkingMetadata {
	pub fn cube(&self) -> BoundingBox {
		BoundingBox::new(Vector3::from_array(self.min), Vector3::from_array(self.max))
	}

	pub fn attribute_bytes(&self) -> usize {
		self.attributes.iter().map(|attribute| attribute.size).sum()
	}

	pub fn read(path: &Path) -> Result<ChunkingMetadata> {
		let contents = fs::read_to_string(path)?;
		Ok(serde_json::from_str(&contents)?)
	}

	pub fn write(&self, path: &Path) -> Result<()> {
		write_json(path, self)
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyInfo {
	pub depth: u32,
	pub nodes: u64,
	pub record_size: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JsonBoundingBox {
	pub min: [f64; 3],
	pub max: [f64; 3],
}

/// `metadata.json` of the finished octree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	pub version: String,
	pub name: String,
	pub description: String,
	pub points: u64,
	pub projection: String,
	pub hierarchy: HierarchyInfo,
	pub offset: [f64; 3],
	pub scale: [f64; 3],
	pub spacing: f64,
	pub grid_size: usize,
	pub bounding_box: JsonBoundingBox,
	pub encoding: Encoding,
	pub attributes: Vec<Attribute>,
}

impl Metadata {
	#[allow(clippy::too_many_arguments)]
	pub fn create(
		name: &str,
		cube: &BoundingBox,
		points: u64,
		hierarchy: HierarchyInfo,
		scale: f64,
		spacing: f64,
		grid_size: usize,
		encoding: Encoding,
		source_attributes: &[Attribute],
	) -> Metadata {
		let mut attributes = vec![Attribute::position()];
		attributes.extend(source_attributes.iter().cloned());

		Metadata {
			version: "2.0".to_string(),
			name: name.to_string(),
			description: "".to_string(),
			points,
			projection: "".to_string(),
			hierarchy,
			offset: cube.min.to_array(),
			scale: [scale, scale, scale],
			spacing,
			grid_size,
			bounding_box: JsonBoundingBox {
				min: cube.min.to_array(),
				max: cube.max.to_array(),
			},
			encoding,
			attributes,
		}
	}

	pub fn read(path: &Path) -> Result<Metadata> {
		let reader = BufReader::new(File::open(path)?);
		Ok(serde_json::from_reader(reader)?)
	}

	pub fn write(&self, path: &Path) -> Result<()> {
		write_json(path, self)
	}
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let mut writer = BufWriter::new(File::create(path)?);
	serde_json::to_writer_pretty(&mut writer, value)?;
	writer.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::attributes::AttributeType;

	#[test]
	fn reads_plain_min_max() {
		let metadata: ChunkingMetadata =
			serde_json::from_str(r#"{ "min": [0, 1, 2], "max": [4, 5, 6] }"#).unwrap();

		assert_eq!(metadata.cube().size(), Vector3::new(4.0, 4.0, 4.0));
		assert!(metadata.attributes.is_empty());
		assert_eq!(metadata.attribute_bytes(), 0);
		assert_eq!(metadata.grid_size, None);
	}

	#[test]
	fn it_serializes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("metadata.json");
		let cube = BoundingBox::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(5.0, 6.0, 7.0));

		let metadata = Metadata::create(
			"test",
			&cube,
			42,
			HierarchyInfo {
				depth: 3,
				nodes: 9,
				record_size: 32,
			},
			0.001,
			0.07,
			4,
			Encoding::DEFAULT,
			&[Attribute::new("intensity", AttributeType::Float, 1)],
		);
		metadata.write(&path).unwrap();

		let contents = fs::read_to_string(&path).unwrap();
		assert!(contents.contains("\"boundingBox\""));
		assert!(contents.contains("\"gridSize\": 4"));
		assert!(contents.contains("\"encoding\": \"DEFAULT\""));

		let read = Metadata::read(&path).unwrap();
		assert_eq!(read, metadata);
		assert_eq!(read.attributes[0].name, "position");
		assert_eq!(read.attributes[1].name, "intensity");
	}
}
