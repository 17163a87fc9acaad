use crate::model::vector3::Vector3;

/// A position plus the index of its record in a parallel attribute buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
	pub position: Vector3,
	pub index: u64,
}

impl Point {
	pub fn new(position: Vector3, index: u64) -> Point {
		Point { position, index }
	}

	pub fn squared_distance_to(&self, other: &Vector3) -> f64 {
		self.position.squared_distance_to(other)
	}
}

/// Points together with the attribute bytes they reference.
///
/// Every point's `index` addresses a record of `attribute_bytes` bytes in
/// `attributes`. Buffers own their attribute bytes, so a buffer outlives the
/// batch or file it was filled from.
#[derive(Clone, Debug, Default)]
pub struct PointBuffer {
	pub attribute_bytes: usize,
	pub points: Vec<Point>,
	pub attributes: Vec<u8>,
}

/// A batch handed over by a point source.
pub type PointBatch = PointBuffer;

impl PointBuffer {
	pub fn new(attribute_bytes: usize) -> PointBuffer {
		PointBuffer {
			attribute_bytes,
			points: Vec::new(),
			attributes: Vec::new(),
		}
	}

	pub fn with_capacity(attribute_bytes: usize, capacity: usize) -> PointBuffer {
		PointBuffer {
			attribute_bytes,
			points: Vec::with_capacity(capacity),
			attributes: Vec::with_capacity(capacity * attribute_bytes),
		}
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}

	/// Appends a point, copying its attribute record.
	pub fn push(&mut self, position: Vector3, attributes: &[u8]) {
		debug_assert_eq!(attributes.len(), self.attribute_bytes);

		let index = self.points.len() as u64;
		self.points.push(Point::new(position, index));
		self.attributes.extend_from_slice(attributes);
	}

	pub fn attributes_of(&self, point: &Point) -> &[u8] {
		let start = point.index as usize * self.attribute_bytes;
		&self.attributes[start..start + self.attribute_bytes]
	}

	/// Copies `points`, which reference `source`, into this buffer.
	pub fn extend_from(&mut self, source: &PointBuffer, points: &[Point]) {
		self.points.reserve(points.len());
		self.attributes.reserve(points.len() * self.attribute_bytes);
		for point in points {
			self.push(point.position, source.attributes_of(point));
		}
	}

	pub fn append(&mut self, other: &PointBuffer) {
		self.extend_from(other, &other.points);
	}
}
