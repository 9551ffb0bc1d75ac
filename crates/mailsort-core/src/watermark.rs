//! Incremental-sync watermark
//!
//! The watermark is never stored on its own. It is derived on every run by
//! asking the vector index for the most recent record whose `date` falls in
//! the lookback window. A query failure degrades to "no watermark", which
//! makes the indexer process everything rather than nothing.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::vector::{VectorIndex, VectorQuery};
use crate::EMBEDDING_DIMENSION;

/// Candidates requested from the index
const WATERMARK_TOP_K: usize = 1;

/// Oldest date (epoch millis) a record may have to count as the watermark
///
/// One day is added to the lookback so a run that starts slightly late still
/// sees the previous run's newest record.
pub fn cutoff(now: DateTime<Utc>, lookback_days: u32) -> i64 {
    (now - Duration::days(i64::from(lookback_days) + 1)).timestamp_millis()
}

/// Id of the most recently indexed email inside the lookback window
///
/// Returns `None` on first run, when nothing recent enough exists, or when the
/// query itself fails (logged at warn).
pub async fn last_processed_id(
    index: &dyn VectorIndex,
    index_name: &str,
    lookback_days: u32,
    now: DateTime<Utc>,
) -> Option<String> {
    let since = cutoff(now, lookback_days);
    let query =
        VectorQuery::metadata_scan(EMBEDDING_DIMENSION, WATERMARK_TOP_K).with_date_gte(since);

    let matches = match index.query(index_name, &query).await {
        Ok(matches) => matches,
        Err(e) => {
            warn!(
                "Watermark query on {} failed, indexing everything: {}",
                index_name, e
            );
            return None;
        }
    };

    // Result order is not trusted; newest date wins
    let mut candidates: Vec<_> = matches.into_iter().filter_map(|m| m.metadata).collect();
    candidates.sort_by(|a, b| b.date.cmp(&a.date));

    match candidates.into_iter().next() {
        Some(latest) => {
            info!("Watermark is {} (date {:?})", latest.id, latest.date);
            Some(latest.id)
        }
        None => {
            debug!("No records since {} in {}", since, index_name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::RecordingVectorIndex;
    use crate::vector::VectorMetadata;
    use chrono::TimeZone;

    fn meta(id: &str, date: i64) -> VectorMetadata {
        VectorMetadata {
            id: id.to_string(),
            date: Some(date),
            content: String::new(),
        }
    }

    #[test]
    fn test_cutoff_adds_one_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap();
        assert_eq!(cutoff(now, 1), expected.timestamp_millis());

        let expected = Utc.with_ymd_and_hms(2024, 5, 9, 12, 0, 0).unwrap();
        assert_eq!(cutoff(now, 0), expected.timestamp_millis());
    }

    #[tokio::test]
    async fn test_query_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let index = RecordingVectorIndex::with_index("emails", EMBEDDING_DIMENSION);

        last_processed_id(&index, "emails", 1, now).await;

        let queries = index.queries();
        assert_eq!(queries.len(), 1);
        let (name, query) = &queries[0];
        assert_eq!(name, "emails");
        assert_eq!(query.top_k, 1);
        assert_eq!(query.date_gte, Some(cutoff(now, 1)));
        assert!(query.is_metadata_scan());
        assert!(query.include_metadata);
        assert_eq!(query.vector.len(), EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn test_resorts_candidates_by_date() {
        let index = RecordingVectorIndex::with_index("emails", EMBEDDING_DIMENSION);
        index.set_query_results(vec![
            meta("imap-10", 1_000),
            meta("imap-12", 3_000),
            meta("imap-11", 2_000),
        ]);

        let id = last_processed_id(&index, "emails", 1, Utc::now()).await;
        assert_eq!(id.as_deref(), Some("imap-12"));
    }

    #[tokio::test]
    async fn test_empty_result_is_none() {
        let index = RecordingVectorIndex::with_index("emails", EMBEDDING_DIMENSION);
        assert_eq!(last_processed_id(&index, "emails", 1, Utc::now()).await, None);
    }

    #[tokio::test]
    async fn test_query_failure_falls_back_to_none() {
        let index = RecordingVectorIndex::with_index("emails", EMBEDDING_DIMENSION);
        index.set_query_results(vec![meta("imap-1", 1)]);
        index.fail_query_with(|_| Error::Other("timeout".to_string()));

        assert_eq!(last_processed_id(&index, "emails", 1, Utc::now()).await, None);
    }
}
