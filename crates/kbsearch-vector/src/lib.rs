pub mod embed;
pub mod memory;
pub mod schema;
pub mod search;
pub mod table;

pub use embed::HashEmbedder;
pub use memory::InMemoryVectorRetriever;
pub use search::{LanceChunkSource, LanceVectorRetriever};
