//! mailsort core library
//!
//! Two pipelines over one mailbox: an incremental indexer that embeds mail
//! into a LanceDB vector index, and a dispatch workflow that classifies unread
//! mail and moves it or drafts a reply.

pub mod chunker;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod mail;
pub mod models;
pub mod vector;
pub mod watermark;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use models::*;

/// Vector dimension of the email index
pub const EMBEDDING_DIMENSION: usize = 1536;

/// Distance metric of the email index
pub const INDEX_METRIC: vector::DistanceMetric = vector::DistanceMetric::Cosine;

/// Application name for config paths
pub const APP_NAME: &str = "mailsort";
