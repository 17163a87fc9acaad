use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConverterError>;

#[derive(Error, Debug)]
pub enum ConverterError {
	#[error("IO error: {0}")]
	Io(#[from] io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("failed to read points: {0}")]
	Reader(String),

	#[error("chunk {id} failed: {source}")]
	Chunk {
		id: String,
		#[source]
		source: Box<ConverterError>,
	},

	#[error("{} task(s) failed, first: {}", .0.len(), first_message(.0))]
	Tasks(Vec<ConverterError>),

	#[error("task pool is closed")]
	PoolClosed,

	#[error("task panicked: {0}")]
	TaskPanicked(String),

	#[error("missing chunk contributions: {}", .0.join(", "))]
	MissingChunks(Vec<String>),

	#[error("node {0} was written twice")]
	DuplicateNode(String),

	#[error("chunk file {path} has {len} bytes, not a multiple of the {record_size} byte record")]
	CorruptChunk {
		path: String,
		len: u64,
		record_size: usize,
	},

	#[error("node at byte {offset} with {size} bytes runs past the {len} byte octree.data")]
	NodeOutOfRange {
		offset: u64,
		size: u64,
		len: u64,
	},

	#[error("no node named {0}")]
	UnknownNode(String),

	#[error("{written} points written, {expected} expected")]
	PointCountMismatch { expected: u64, written: u64 },
}

impl ConverterError {
	pub fn for_chunk(id: &str, source: ConverterError) -> ConverterError {
		ConverterError::Chunk {
			id: id.to_string(),
			source: Box::new(source),
		}
	}

	/// Chunk ids of every per-chunk failure contained in this error.
	pub fn failed_chunks(&self) -> Vec<String> {
		match self {
			ConverterError::Chunk { id, .. } => vec![id.clone()],
			ConverterError::Tasks(errors) => errors.iter().flat_map(|e| e.failed_chunks()).collect(),
			ConverterError::MissingChunks(ids) => ids.clone(),
			_ => Vec::new(),
		}
	}
}

fn first_message(errors: &[ConverterError]) -> String {
	errors
		.first()
		.map(|error| error.to_string())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::ConverterError;

	#[test]
	fn collects_failed_chunk_ids() {
		let error = ConverterError::Tasks(vec![
			ConverterError::for_chunk("r01", ConverterError::PoolClosed),
			ConverterError::Config("bad".to_string()),
			ConverterError::for_chunk("r77", ConverterError::UnknownNode("r7".to_string())),
		]);

		assert_eq!(error.failed_chunks(), vec!["r01".to_string(), "r77".to_string()]);
		assert!(error.to_string().starts_with("3 task(s) failed"));
	}
}
