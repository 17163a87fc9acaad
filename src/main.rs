use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;

use potree_bluenoise::converter::{convert, open_source};
use potree_bluenoise::Options;

/// Converts a point cloud into a level-of-detail octree
#[derive(Parser, Debug)]
#[command(name = "potree-bluenoise", version, about)]
struct Cli {
	/// Input point cloud (.csv or .pcd)
	#[arg(value_name = "FILE")]
	input: PathBuf,

	/// Output directory
	#[arg(short, long, value_name = "DIR")]
	outdir: PathBuf,

	/// Dataset name written to metadata.json
	#[arg(long)]
	name: Option<String>,

	/// Cells per axis of the chunk grid (power of two)
	#[arg(long, default_value_t = 4)]
	grid_size: usize,

	/// Base spacing of the root node, defaults to the cube diagonal / 100
	#[arg(long)]
	spacing: Option<f64>,

	/// Quantization step of written positions
	#[arg(long)]
	scale: Option<f64>,

	/// Points a node buffers before it splits
	#[arg(long, default_value_t = 10_000)]
	store_capacity: usize,

	/// Level below which nodes stop splitting
	#[arg(long, default_value_t = 24)]
	max_depth: usize,

	/// Worker threads for flushing and indexing, defaults to all cores
	#[arg(long)]
	threads: Option<usize>,

	/// Exact minimum-spacing check, without the distance-to-center shortcut
	#[arg(long)]
	exact: bool,

	/// Keep the intermediate chunk files
	#[arg(long)]
	keep_chunks: bool,

	/// Skip the hierarchy.json mirror
	#[arg(long)]
	no_hierarchy_json: bool,
}

impl Cli {
	fn options(&self) -> Options {
		let defaults = Options::default();
		let name = self.name.clone().unwrap_or_else(|| {
			self.input
				.file_stem()
				.map(|stem| stem.to_string_lossy().to_string())
				.unwrap_or_default()
		});

		Options {
			name,
			grid_size: self.grid_size,
			spacing: self.spacing,
			scale: self.scale,
			store_capacity: self.store_capacity,
			max_depth: self.max_depth,
			flush_threads: self.threads.unwrap_or(defaults.flush_threads),
			index_threads: self.threads.unwrap_or(defaults.index_threads),
			pruning: !self.exact,
			keep_chunks: self.keep_chunks,
			hierarchy_json: !self.no_hierarchy_json,
			..defaults
		}
	}
}

fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();
	let options = cli.options();

	let mut source = open_source(&cli.input)
		.with_context(|| format!("failed to read {}", cli.input.display()))?;

	let summary = convert(&mut source, &cli.outdir, &options)
		.with_context(|| format!("failed to convert into {}", cli.outdir.display()))?;

	info!(
		"{} points, {} chunks, {} nodes (depth {}), {} bytes in {:.3}s",
		summary.points,
		summary.chunks,
		summary.nodes,
		summary.depth,
		summary.bytes,
		summary.duration.as_secs_f64()
	);

	Ok(())
}
