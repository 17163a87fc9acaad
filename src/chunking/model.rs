use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ConverterError, Result};
use crate::model::attributes::Attribute;
use crate::model::bounds::BoundingBox;
use crate::model::point::PointBuffer;
use crate::model::vector3::Vector3;

/// 3 x f64 position ahead of the attribute bytes.
pub const POSITION_BYTES: usize = 3 * 8;

/// A leaf cell of the partition grid and its backing file.
#[derive(Clone, Debug)]
pub struct Chunk {
	pub id: String,
	pub bounds: BoundingBox,
	pub file: PathBuf,
}

pub struct Chunks {
	pub list: Vec<Chunk>,
	pub cube: BoundingBox,
	pub attributes: Vec<Attribute>,
	pub points: u64,
	pub grid_size: usize,
}

/// Points of one cell waiting to be appended to the cell's file.
pub struct ChunkPiece {
	pub index: usize,
	pub name: String,
	pub path: PathBuf,
	pub points: PointBuffer,
}

pub fn chunk_file_name(id: &str) -> String {
	format!("chunk_{}.bin", id)
}

pub fn chunk_id_of(file_name: &str) -> Option<&str> {
	file_name.strip_prefix("chunk_")?.strip_suffix(".bin")
}

/// Grid cell of `position`, `ix + grid * iy + grid² * iz`, clamped to the grid.
pub fn cell_index(position: &Vector3, cube: &BoundingBox, grid_size: usize) -> usize {
	let size = cube.size();
	let grid = grid_size as f64;
	let max_cell = grid - 1.0;

	let to_cell = |value: f64, min: f64, extent: f64| -> usize {
		let cell = (grid * (value - min) / extent).floor();
		cell.max(0.0).min(max_cell) as usize
	};

	let ix = to_cell(position.x, cube.min.x, size.x);
	let iy = to_cell(position.y, cube.min.y, size.y);
	let iz = to_cell(position.z, cube.min.z, size.z);

	ix + grid_size * iy + grid_size * grid_size * iz
}

/// Name of a grid cell as an octant path, one digit per halving of the grid.
pub fn chunk_name(index: usize, grid_size: usize) -> String {
	let mut ix = index % grid_size;
	let mut iy = (index / grid_size) % grid_size;
	let mut iz = index / (grid_size * grid_size);

	let mut name = "r".to_string();
	let levels = grid_size.trailing_zeros();

	let mut div = grid_size;
	for _ in 0..levels {
		let half = div / 2;
		let mut octant = 0;

		if ix >= half {
			octant |= 0b100;
			ix -= half;
		}
		if iy >= half {
			octant |= 0b010;
			iy -= half;
		}
		if iz >= half {
			octant |= 0b001;
			iz -= half;
		}

		name.push_str(&octant.to_string());
		div = half;
	}

	name
}

pub fn record_size(attribute_bytes: usize) -> usize {
	POSITION_BYTES + attribute_bytes
}

pub fn encode_records(points: &PointBuffer) -> Result<Vec<u8>> {
	let mut data = Vec::with_capacity(points.len() * record_size(points.attribute_bytes));

	for point in &points.points {
		data.write_f64::<LittleEndian>(point.position.x)?;
		data.write_f64::<LittleEndian>(point.position.y)?;
		data.write_f64::<LittleEndian>(point.position.z)?;
		data.extend_from_slice(points.attributes_of(point));
	}

	Ok(data)
}

pub fn decode_records(data: Vec<u8>, attribute_bytes: usize) -> Result<PointBuffer> {
	let size = record_size(attribute_bytes);
	let num_points = data.len() / size;
	let mut points = PointBuffer::with_capacity(attribute_bytes, num_points);

	let mut cursor = Cursor::new(&data);
	for i in 0..num_points {
		cursor.set_position((i * size) as u64);
		let position = Vector3::new(
			cursor.read_f64::<LittleEndian>()?,
			cursor.read_f64::<LittleEndian>()?,
			cursor.read_f64::<LittleEndian>()?,
		);
		let start = i * size + POSITION_BYTES;
		points.push(position, &data[start..start + attribute_bytes]);
	}

	Ok(points)
}

pub fn read_chunk(path: &Path, attribute_bytes: usize) -> Result<PointBuffer> {
	let data = fs::read(path)?;
	let size = record_size(attribute_bytes);

	if data.len() % size != 0 {
		return Err(ConverterError::CorruptChunk {
			path: path.display().to_string(),
			len: data.len() as u64,
			record_size: size,
		});
	}

	decode_records(data, attribute_bytes)
}
