pub mod payload;
pub mod qdrant;

mod error;

pub use error::Error;
pub use qdrant::QdrantIndex;

pub type Result<T, E = Error> = std::result::Result<T, E>;
