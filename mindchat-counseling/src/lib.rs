//! Counseling topic routing for Mind-Chat.

pub mod catalog;
pub mod embedding;
pub mod errors;
pub mod retriever;
pub mod router;

pub use mindchat_core::config::{CounselingSettings, RoutingSettings};

pub use catalog::TopicCatalog;
pub use embedding::{EmbeddingProvider, HashEncoder, TextEncoder};
pub use errors::{CounselingError, CounselingResult, EmbeddingError};
pub use retriever::{TopicIndex, TopicIndexBuilder, TopicMatch};
pub use router::{RouteOutcome, TopicRouter, TopicState};
