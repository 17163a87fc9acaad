use std::fs;
use std::path::Path;

use csv::Reader;
use serde::Deserialize;

use crate::error::{ConverterError, Result};
use crate::model::attributes::{Attribute, AttributeType, Attributes};
use crate::model::point::PointBuffer;
use crate::model::vector3::Vector3;
use crate::reader::MemorySource;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Intensity {
	Int(u8),
	Float(f32),
}

impl Intensity {
	fn value(&self) -> f32 {
		match self {
			Intensity::Int(value) => f32::from(*value),
			Intensity::Float(value) => *value,
		}
	}
}

#[derive(Debug, Deserialize)]
struct Record {
	x: f64,
	y: f64,
	z: f64,
	intensity: Option<Intensity>,
}

/// Reads `x,y,z[,intensity]` rows. An `intensity` column becomes a float attribute,
/// empty cells read as 0.
pub fn read_csv(buf: &[u8]) -> Result<MemorySource> {
	let mut rdr = Reader::from_reader(buf);
	let has_intensity = rdr
		.headers()
		.map_err(|err| ConverterError::Reader(err.to_string()))?
		.iter()
		.any(|header| header.trim() == "intensity");

	let attributes = if has_intensity {
		Attributes::from_attributes(vec![Attribute::new("intensity", AttributeType::Float, 1)])
	} else {
		Attributes::new()
	};

	let mut points = PointBuffer::new(attributes.bytes);
	for result in rdr.deserialize() {
		let record: Record = result.map_err(|err| ConverterError::Reader(err.to_string()))?;

		let Record { x, y, z, intensity } = record;
		if has_intensity {
			let value = intensity.map_or(0.0, |intensity| intensity.value());
			points.push(Vector3::new(x, y, z), &value.to_le_bytes());
		} else {
			points.push(Vector3::new(x, y, z), &[]);
		}
	}

	MemorySource::new(attributes, points)
}

pub fn read_csv_file(path: &Path) -> Result<MemorySource> {
	let buffer = fs::read(path)?;
	read_csv(&buffer)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reader::PointSource;

	const INTEGER_INTENSITY: &str = "x,y,z,intensity
1.0,2.0,3.0,10
4.5,5.5,6.5,255
-1,0,1,0
";

	const FLOAT_INTENSITY: &str = "x,y,z,intensity
1.0,2.0,3.0,0.25
4.5,5.5,6.5,
";

	fn intensities(source: &mut MemorySource) -> Vec<f32> {
		let batch = source.next_batch(100).unwrap().unwrap();
		batch
			.points
			.iter()
			.map(|point| {
				let bytes = batch.attributes_of(point);
				f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
			})
			.collect()
	}

	#[test]
	fn reads_integer_intensity() {
		let mut source = read_csv(INTEGER_INTENSITY.as_bytes()).unwrap();

		assert_eq!(source.len(), 3);
		assert_eq!(source.attributes().bytes, 4);
		assert_eq!(source.bounds().unwrap().min, Vector3::new(-1.0, 0.0, 1.0));
		assert_eq!(intensities(&mut source), vec![10.0, 255.0, 0.0]);
	}

	#[test]
	fn reads_float_and_missing_intensity() {
		let mut source = read_csv(FLOAT_INTENSITY.as_bytes()).unwrap();
		assert_eq!(intensities(&mut source), vec![0.25, 0.0]);
	}

	#[test]
	fn reads_positions_only() {
		let mut source = read_csv(b"x,y,z\n1,2,3\n4,5,6\n").unwrap();
		assert_eq!(source.attributes().bytes, 0);

		let batch = source.next_batch(10).unwrap().unwrap();
		assert_eq!(batch.points[1].position, Vector3::new(4.0, 5.0, 6.0));
	}

	#[test]
	fn reports_malformed_rows() {
		let result = read_csv(b"x,y,z\n1,2,not-a-number\n");
		assert!(matches!(result, Err(ConverterError::Reader(_))));
	}
}
