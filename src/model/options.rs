use serde::{Deserialize, Serialize};

use crate::error::{ConverterError, Result};
use crate::model::bounds::BoundingBox;

/// Default base spacing is the cube diagonal divided by this.
const SPACING_DIVISOR: f64 = 100.0;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Options {
	pub name: String,
	pub encoding: Encoding,

	/// Cells per axis of the partition grid, a power of two.
	pub grid_size: usize,
	/// Buffered points per cell before the cell is flushed to its chunk file.
	pub flush_threshold: usize,
	pub store_capacity: usize,
	pub max_depth: usize,

	/// Base spacing of the root; derived from the cube diagonal when unset.
	pub spacing: Option<f64>,
	/// Quantization step of written positions; derived from the cube diagonal when unset.
	pub scale: Option<f64>,

	pub flush_threads: usize,
	pub index_threads: usize,
	pub batch_size: usize,

	/// Distance-to-center early exit in the acceptance pass.
	pub pruning: bool,
	pub keep_chunks: bool,
	pub hierarchy_json: bool,
}

/// Point record encoding; only uncompressed records are written.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
	DEFAULT,
}

impl Default for Options {
	fn default() -> Options {
		let threads = std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(4);

		Options {
			name: String::new(),
			encoding: Encoding::DEFAULT,
			grid_size: 4,
			flush_threshold: 1_000_000,
			store_capacity: 10_000,
			max_depth: 24,
			spacing: None,
			scale: None,
			flush_threads: threads,
			index_threads: threads,
			batch_size: 1_000_000,
			pruning: true,
			keep_chunks: false,
			hierarchy_json: true,
		}
	}
}

impl Options {
	pub fn validate(&self) -> Result<()> {
		if self.grid_size == 0 || !self.grid_size.is_power_of_two() {
			return Err(ConverterError::Config(format!(
				"grid size must be a power of two, got {}",
				self.grid_size
			)));
		}

		let positive = [
			("flush threshold", self.flush_threshold),
			("store capacity", self.store_capacity),
			("flush threads", self.flush_threads),
			("index threads", self.index_threads),
			("batch size", self.batch_size),
		];
		for (name, value) in positive {
			if value == 0 {
				return Err(ConverterError::Config(format!("{} must be at least 1", name)));
			}
		}

		let levels = self.grid_size.trailing_zeros() as usize;
		if self.max_depth < levels {
			return Err(ConverterError::Config(format!(
				"max depth {} is below the chunk level {}",
				self.max_depth, levels
			)));
		}

		for (name, value) in [("spacing", self.spacing), ("scale", self.scale)] {
			if let Some(value) = value {
				if !value.is_finite() || value <= 0.0 {
					return Err(ConverterError::Config(format!(
						"{} must be a positive number, got {}",
						name, value
					)));
				}
			}
		}

		Ok(())
	}

	pub fn spacing_for(&self, cube: &BoundingBox) -> f64 {
		self.spacing.unwrap_or_else(|| cube.diagonal() / SPACING_DIVISOR)
	}

	/// Quantization step for `cube`. Every quantized coordinate must fit an i32.
	pub fn scale_for(&self, cube: &BoundingBox) -> Result<f64> {
		let scale = match self.scale {
			Some(scale) => scale,
			None => {
				let diagonal = cube.diagonal();
				if diagonal > 1_000_000.0 {
					0.01
				} else if diagonal > 1.0 {
					0.001
				} else {
					0.0001
				}
			}
		};

		let steps = (cube.size().max_component() / scale).ceil();
		if !steps.is_finite() || steps > f64::from(i32::MAX) {
			return Err(ConverterError::Config(format!(
				"scale {} is too fine for an extent of {}",
				scale,
				cube.size().max_component()
			)));
		}

		Ok(scale)
	}
}
