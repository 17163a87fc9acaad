pub mod indexing;
pub mod model;
pub mod sampling;

pub use indexing::do_indexing;
