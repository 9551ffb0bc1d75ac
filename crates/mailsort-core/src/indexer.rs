//! Incremental email indexing
//!
//! One run makes sure the index exists, derives the watermark, fetches the
//! whole mailbox newest first and embeds emails until it reaches the
//! watermark id. Each email is chunked, embedded in one batch and upserted in
//! one call. A failing email is logged and skipped; emails indexed before it
//! stay indexed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::chunker::Chunker;
use crate::config::IndexConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::mail::MailSource;
use crate::models::{sort_newest_first, Email};
use crate::vector::{ensure_index, VectorIndex, VectorMetadata};
use crate::watermark::last_processed_id;
use crate::{EMBEDDING_DIMENSION, INDEX_METRIC};

/// Summary of one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Emails returned by the mailbox
    pub fetched: usize,
    /// Emails chunked, embedded and upserted
    pub indexed: usize,
    /// Emails with an empty body
    pub skipped_empty: usize,
    /// Emails whose embed or upsert failed
    pub failed: usize,
    pub vectors_upserted: usize,
    /// Watermark id the run stopped at, if it was reached
    pub stopped_at_watermark: Option<String>,
}

/// Outcome for a single email
enum Indexed {
    Vectors(usize),
    Empty,
}

/// Indexing pipeline
pub struct EmailIndexer {
    mail: Arc<dyn MailSource>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    index_name: String,
    days_last_run: u32,
}

impl EmailIndexer {
    pub fn new(
        mail: Arc<dyn MailSource>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: &IndexConfig,
    ) -> Self {
        Self {
            mail,
            embedder,
            index,
            chunker: Chunker::new(config.chunk_size),
            index_name: config.name.clone(),
            days_last_run: config.days_last_run,
        }
    }

    /// Run once against the current time
    pub async fn run(&self) -> Result<IndexReport> {
        self.run_at(Utc::now()).await
    }

    /// Run once with an explicit clock
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<IndexReport> {
        if self.embedder.dimension() != EMBEDDING_DIMENSION {
            return Err(Error::ContractViolation(format!(
                "embedder produces {}-dimensional vectors, index {} expects {}",
                self.embedder.dimension(),
                self.index_name,
                EMBEDDING_DIMENSION
            )));
        }

        if let Err(e) = ensure_index(
            self.index.as_ref(),
            &self.index_name,
            EMBEDDING_DIMENSION,
            INDEX_METRIC,
        )
        .await
        {
            error!("Index {} is unavailable: {}", self.index_name, e);
            return Err(e);
        }

        let watermark =
            last_processed_id(self.index.as_ref(), &self.index_name, self.days_last_run, now)
                .await;

        let mut emails = self.mail.fetch_all().await?;
        sort_newest_first(&mut emails);

        let mut report = IndexReport {
            fetched: emails.len(),
            ..Default::default()
        };
        info!(
            "Indexing up to {} emails (watermark: {})",
            emails.len(),
            watermark.as_deref().unwrap_or("none")
        );

        for email in &emails {
            if watermark.as_deref() == Some(email.id.as_str()) {
                info!("Reached watermark {}, stopping", email.id);
                report.stopped_at_watermark = Some(email.id.clone());
                break;
            }

            match self.index_email(email).await {
                Ok(Indexed::Vectors(n)) => {
                    report.indexed += 1;
                    report.vectors_upserted += n;
                }
                Ok(Indexed::Empty) => {
                    info!("Skipping {}: empty body", email.id);
                    report.skipped_empty += 1;
                }
                Err(e) => {
                    error!("Failed to index {}: {}", email.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Indexing finished: {} indexed, {} empty, {} failed, {} vectors",
            report.indexed, report.skipped_empty, report.failed, report.vectors_upserted
        );
        Ok(report)
    }

    async fn index_email(&self, email: &Email) -> Result<Indexed> {
        let chunks = self.chunker.chunk_email(email);
        if chunks.is_empty() {
            return Ok(Indexed::Empty);
        }

        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::ContractViolation(format!(
                "{} chunks produced {} vectors",
                texts.len(),
                vectors.len()
            )));
        }

        let metadata = VectorMetadata {
            id: email.id.clone(),
            date: email.date_millis(),
            content: email.canonical_text(),
        };
        let metadata = vec![metadata; vectors.len()];

        let written = self.index.upsert(&self.index_name, vectors, metadata).await?;
        debug!("Indexed {} as {} vectors", email.id, written);
        Ok(Indexed::Vectors(written))
    }
}
