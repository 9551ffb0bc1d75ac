//! Vector index abstraction
//!
//! The indexing pipeline only needs four operations from a vector store:
//! describe, create, a filtered query and upsert. They sit behind the
//! [`VectorIndex`] trait; [`LanceVectorIndex`] is the LanceDB-backed adapter.

mod lance;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use lance::LanceVectorIndex;

/// Distance metric an index is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dotproduct",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "dotproduct" | "dot" => Ok(DistanceMetric::DotProduct),
            other => Err(Error::Other(format!("unknown distance metric '{}'", other))),
        }
    }
}

/// Shape of an existing index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
}

/// Metadata persisted with every vector
///
/// `id` and `date` are what the watermark query reads back, so their names and
/// types must stay stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Source email id (`imap-<uid>`)
    pub id: String,
    /// Email date, Unix epoch milliseconds
    pub date: Option<i64>,
    /// Full canonical text of the source email
    pub content: String,
}

/// A filtered query against an index
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    /// Only records whose `date` is at or after this value (epoch millis)
    pub date_gte: Option<i64>,
    pub include_metadata: bool,
}

impl VectorQuery {
    /// A query whose only purpose is metadata filtering
    ///
    /// The all-zero vector carries no similarity signal, so ranking of the
    /// results is meaningless and callers must order them themselves.
    pub fn metadata_scan(dimension: usize, top_k: usize) -> Self {
        Self {
            vector: vec![0.0; dimension],
            top_k,
            date_gte: None,
            include_metadata: true,
        }
    }

    pub fn with_date_gte(mut self, millis: i64) -> Self {
        self.date_gte = Some(millis);
        self
    }

    /// True when the query vector is all zeros
    pub fn is_metadata_scan(&self) -> bool {
        self.vector.iter().all(|v| *v == 0.0)
    }
}

/// One record returned by a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub metadata: Option<VectorMetadata>,
}

/// Vector store operations used by the indexing pipeline
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Describe an index; a missing index is `Error::IndexNotFound`
    async fn describe_index(&self, name: &str) -> Result<IndexInfo>;

    /// Create an index; an existing one is `Error::IndexAlreadyExists`
    async fn create_index(&self, name: &str, dimension: usize, metric: DistanceMetric)
        -> Result<()>;

    /// Run a filtered metadata scan; ranked similarity search is not supported
    async fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<QueryMatch>>;

    /// Write vectors with their metadata; both lists must have the same length.
    /// Returns the number of records written.
    async fn upsert(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<VectorMetadata>,
    ) -> Result<usize>;
}

/// Make sure an index exists, creating it on first use
///
/// Returns true when the index was created by this call. A concurrent creator
/// winning the race is not an error; any other describe failure is.
pub async fn ensure_index(
    index: &dyn VectorIndex,
    name: &str,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<bool> {
    match index.describe_index(name).await {
        Ok(info) => {
            debug!(
                "Index {} exists (dimension {}, metric {})",
                info.name, info.dimension, info.metric
            );
            Ok(false)
        }
        Err(e) if e.is_not_found() => {
            info!(
                "Creating index {} (dimension {}, metric {})",
                name, dimension, metric
            );
            match index.create_index(name, dimension, metric).await {
                Ok(()) => Ok(true),
                Err(Error::IndexAlreadyExists(_)) => {
                    debug!("Index {} was created concurrently", name);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Reject an upsert whose vector and metadata lists disagree in length
pub fn check_upsert_lengths(vectors: &[Vec<f32>], metadata: &[VectorMetadata]) -> Result<()> {
    if vectors.len() != metadata.len() {
        return Err(Error::ContractViolation(format!(
            "upsert got {} vectors but {} metadata entries",
            vectors.len(),
            metadata.len()
        )));
    }
    Ok(())
}
