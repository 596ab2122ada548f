pub mod config;
pub mod error;
pub mod source;
pub mod traits;
pub mod types;

pub use error::{Backend, Error, ErrorPayload, Result};
pub use types::{
    Category, Chunk, ChunkId, FusionMethod, Meta, QueryClassification, RankedResult, RetrievalMethod,
    RetrievalStrategy, ScoreKind, ScoredCandidate, TokenizerKind,
};
