pub mod chunking;
pub mod converter;
pub mod error;
pub mod indexing;
pub mod model;
pub mod reader;
pub mod task_pool;
pub mod writer;

pub use converter::{convert, ConversionSummary};
pub use error::{ConverterError, Result};
pub use model::options::Options;
