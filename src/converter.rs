use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use log::info;

use crate::chunking::chunker::Chunker;
use crate::error::{ConverterError, Result};
use crate::indexing::do_indexing;
use crate::model::options::Options;
use crate::reader::csv_reader::read_csv_file;
use crate::reader::pcd_reader::read_pcd_file;
use crate::reader::{MemorySource, PointSource};

#[derive(Clone, Debug)]
pub struct ConversionSummary {
	pub points: u64,
	pub chunks: usize,
	pub nodes: usize,
	pub depth: usize,
	pub bytes: u64,
	pub spacing: f64,
	pub scale: f64,
	pub duration: Duration,
}

/// Loads a `.csv` or `.pcd` file.
pub fn open_source(path: &Path) -> Result<MemorySource> {
	let extension = path
		.extension()
		.map(|extension| extension.to_string_lossy().to_lowercase())
		.unwrap_or_default();

	match extension.as_str() {
		"csv" => read_csv_file(path),
		"pcd" => read_pcd_file(path),
		_ => Err(ConverterError::Reader(format!(
			"unsupported input {}, expected .csv or .pcd",
			path.display()
		))),
	}
}

/// Runs the whole pipeline: chunking into `<target_dir>/chunks`, then indexing.
pub fn convert<S: PointSource>(source: &mut S, target_dir: &Path, options: &Options) -> Result<ConversionSummary> {
	let start = Instant::now();
	options.validate()?;

	let bounds = source
		.bounds()
		.ok_or_else(|| ConverterError::Config("the input has no points".to_string()))?;
	let cube = bounds.cubic();
	cube.validate()?;
	options.scale_for(&cube)?;

	fs::create_dir_all(target_dir)?;

	info!(
		"converting into {}, cube {:?} - {:?}",
		target_dir.display(),
		cube.min.to_array(),
		cube.max.to_array()
	);

	let mut chunker = Chunker::new(
		&target_dir.join("chunks"),
		source.attributes().clone(),
		cube,
		options.grid_size,
		options.flush_threshold,
		options.flush_threads,
	)?;
	while let Some(batch) = source.next_batch(options.batch_size)? {
		chunker.add(&batch)?;
	}
	let chunking = chunker.close()?;

	let indexing = do_indexing(target_dir, options)?;

	let summary = ConversionSummary {
		points: indexing.points,
		chunks: chunking.chunks,
		nodes: indexing.nodes,
		depth: indexing.depth,
		bytes: indexing.bytes,
		spacing: indexing.spacing,
		scale: indexing.scale,
		duration: start.elapsed(),
	};

	info!(
		"converted {} points in {:.3}s",
		summary.points,
		summary.duration.as_secs_f64()
	);

	Ok(summary)
}
