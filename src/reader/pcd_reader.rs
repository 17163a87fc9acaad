use std::fs;
use std::path::Path;

use pcd_rs::{DynReader, DynRecord};

use crate::error::{ConverterError, Result};
use crate::model::attributes::Attributes;
use crate::model::point::PointBuffer;
use crate::model::vector3::Vector3;
use crate::reader::MemorySource;

/// Reads the `x y z` fields of a PCD file. Other fields are ignored.
pub fn read_pcd(buf: &[u8]) -> Result<MemorySource> {
	let reader = DynReader::from_bytes(buf).map_err(|err| ConverterError::Reader(err.to_string()))?;
	let records: Vec<DynRecord> = reader
		.collect::<std::result::Result<_, _>>()
		.map_err(|err| ConverterError::Reader(err.to_string()))?;

	let mut points = PointBuffer::with_capacity(0, records.len());
	for (i, record) in records.into_iter().enumerate() {
		let xyz = record.clone().xyz::<f64>().or_else(|| {
			record
				.xyz::<f32>()
				.map(|[x, y, z]| [f64::from(x), f64::from(y), f64::from(z)])
		});

		let [x, y, z] = xyz.ok_or_else(|| ConverterError::Reader(format!("record {} has no x, y, z fields", i)))?;
		points.push(Vector3::new(x, y, z), &[]);
	}

	MemorySource::new(Attributes::new(), points)
}

pub fn read_pcd_file(path: &Path) -> Result<MemorySource> {
	let buffer = fs::read(path)?;
	read_pcd(&buffer)
}
