use crate::error::{ConverterError, Result};
use crate::model::attributes::Attributes;
use crate::model::bounds::{find_bounds, BoundingBox};
use crate::model::point::{PointBatch, PointBuffer};
use crate::model::vector3::Vector3;

pub mod csv_reader;
pub mod octree_reader;
pub mod pcd_reader;

/// A stream of points handed to the chunker in batches.
pub trait PointSource {
	fn attributes(&self) -> &Attributes;

	/// Box of every point the source will produce, if known up front.
	fn bounds(&self) -> Option<BoundingBox>;

	/// Next batch of at most `max_points` points, `None` once exhausted.
	fn next_batch(&mut self, max_points: usize) -> Result<Option<PointBatch>>;
}

/// Points already held in memory.
pub struct MemorySource {
	attributes: Attributes,
	points: PointBuffer,
	cursor: usize,
}

impl MemorySource {
	pub fn new(attributes: Attributes, points: PointBuffer) -> Result<MemorySource> {
		if points.attribute_bytes != attributes.bytes {
			return Err(ConverterError::Reader(format!(
				"points carry {} attribute bytes, schema describes {}",
				points.attribute_bytes, attributes.bytes
			)));
		}

		Ok(MemorySource {
			attributes,
			points,
			cursor: 0,
		})
	}

	/// Positions without attributes.
	pub fn from_positions(positions: &[Vector3]) -> MemorySource {
		let mut points = PointBuffer::with_capacity(0, positions.len());
		for position in positions {
			points.push(*position, &[]);
		}

		MemorySource {
			attributes: Attributes::new(),
			points,
			cursor: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}
}

impl PointSource for MemorySource {
	fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	fn bounds(&self) -> Option<BoundingBox> {
		let positions: Vec<Vector3> = self.points.points.iter().map(|p| p.position).collect();
		find_bounds(&positions)
	}

	fn next_batch(&mut self, max_points: usize) -> Result<Option<PointBatch>> {
		if self.cursor >= self.points.len() {
			return Ok(None);
		}

		let end = (self.cursor + max_points.max(1)).min(self.points.len());
		let mut batch = PointBuffer::with_capacity(self.points.attribute_bytes, end - self.cursor);
		batch.extend_from(&self.points, &self.points.points[self.cursor..end]);
		self.cursor = end;

		Ok(Some(batch))
	}
}
