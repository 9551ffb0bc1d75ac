//! Recording test doubles for the collaborator traits

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::llm::{Answerer, Classifier};
use crate::mail::{Draft, MailCursor, MailSource};
use crate::models::{Address, Category, Email};
use crate::vector::{
    check_upsert_lengths, DistanceMetric, IndexInfo, QueryMatch, VectorIndex, VectorMetadata,
    VectorQuery,
};
use crate::EMBEDDING_DIMENSION;

/// Ordered log shared between doubles
pub type CallLog = Arc<Mutex<Vec<String>>>;

type ErrorFn = Box<dyn Fn(&str) -> Error + Send + Sync>;

/// An undated email
pub fn email(uid: u32, subject: &str, text: &str, from: Option<&str>) -> Email {
    Email {
        id: Email::id_for_uid(uid),
        uid,
        message_id: Some(format!("msg-{}@example.com", uid)),
        from: from.map(|a| Address::new(a)),
        to: vec![Address::new("sales@example.com")],
        cc: vec![],
        bcc: vec![],
        subject: subject.to_string(),
        text: text.to_string(),
        date: None,
    }
}

/// A dated email from a fixed sender
pub fn email_dated(uid: u32, subject: &str, text: &str, date: DateTime<Utc>) -> Email {
    Email {
        date: Some(date),
        ..email(uid, subject, text, Some("customer@example.com"))
    }
}

// ============================================================================
// Mail
// ============================================================================

#[derive(Default)]
struct MailState {
    unread: Vec<Email>,
    all: Vec<Email>,
    fetch_all_calls: usize,
    moves: Vec<(u32, String)>,
    drafts: Vec<Draft>,
    failing_moves: Vec<u32>,
    cursor_fail_after: Option<usize>,
}

/// Mail source that serves fixed emails and records every mutation
#[derive(Default)]
pub struct RecordingMailSource {
    state: Arc<Mutex<MailState>>,
    log: CallLog,
}

impl RecordingMailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unread(self, emails: Vec<Email>) -> Self {
        self.state.lock().unread = emails;
        self
    }

    pub fn with_all(self, emails: Vec<Email>) -> Self {
        self.state.lock().all = emails;
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn log_entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn moves(&self) -> Vec<(u32, String)> {
        self.state.lock().moves.clone()
    }

    pub fn drafts(&self) -> Vec<Draft> {
        self.state.lock().drafts.clone()
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.state.lock().fetch_all_calls
    }

    pub fn fail_move_for(&self, uid: u32) {
        self.state.lock().failing_moves.push(uid);
    }

    /// Make the unread cursor fail once it has yielded `n` emails
    pub fn fail_cursor_after(&self, n: usize) {
        self.state.lock().cursor_fail_after = Some(n);
    }
}

#[async_trait]
impl MailSource for RecordingMailSource {
    async fn unread(&self) -> Result<Box<dyn MailCursor>> {
        let state = self.state.lock();
        Ok(Box::new(RecordingCursor {
            pending: state.unread.clone().into(),
            yielded: 0,
            fail_after: state.cursor_fail_after,
            closed: false,
            log: self.log.clone(),
        }))
    }

    async fn fetch_all(&self) -> Result<Vec<Email>> {
        let mut state = self.state.lock();
        state.fetch_all_calls += 1;
        Ok(state.all.clone())
    }

    async fn move_to(&self, email: &Email, folder: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_moves.contains(&email.uid) {
            return Err(Error::Imap(format!("move of {} refused", email.uid)));
        }
        state.moves.push((email.uid, folder.to_string()));
        self.log.lock().push(format!("move:{}", email.id));
        Ok(())
    }

    async fn create_draft(&self, draft: &Draft) -> Result<()> {
        self.state.lock().drafts.push(draft.clone());
        self.log.lock().push(format!("draft:{}", draft.to));
        Ok(())
    }
}

struct RecordingCursor {
    pending: std::collections::VecDeque<Email>,
    yielded: usize,
    fail_after: Option<usize>,
    closed: bool,
    log: CallLog,
}

#[async_trait]
impl MailCursor for RecordingCursor {
    async fn next_email(&mut self) -> Result<Option<Email>> {
        if self.closed {
            return Ok(None);
        }
        if self.fail_after == Some(self.yielded) {
            self.log.lock().push("next:error".to_string());
            return Err(Error::Imap("connection reset".to_string()));
        }

        match self.pending.pop_front() {
            Some(email) => {
                self.yielded += 1;
                self.log.lock().push(format!("next:{}", email.id));
                Ok(Some(email))
            }
            None => {
                self.log.lock().push("next:end".to_string());
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().push("close".to_string());
        }
    }
}

// ============================================================================
// Vector index
// ============================================================================

#[derive(Default)]
struct IndexState {
    indexes: HashMap<String, IndexInfo>,
    records: Vec<(String, VectorMetadata)>,
    created: Vec<(String, usize, DistanceMetric)>,
    queries: Vec<(String, VectorQuery)>,
    upserts: Vec<(String, Vec<Vec<f32>>, Vec<VectorMetadata>)>,
    query_results: Option<Vec<VectorMetadata>>,
    failing_upserts: Vec<String>,
}

/// In-memory vector index that records every call
///
/// Queries return stored records in insertion order, filtered by date and
/// truncated to `top_k`, unless fixed results were set.
#[derive(Default)]
pub struct RecordingVectorIndex {
    state: Mutex<IndexState>,
    fail_describe: Mutex<Option<ErrorFn>>,
    fail_create: Mutex<Option<ErrorFn>>,
    fail_query: Mutex<Option<ErrorFn>>,
}

impl RecordingVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(name: &str, dimension: usize) -> Self {
        let index = Self::default();
        index.state.lock().indexes.insert(
            name.to_string(),
            IndexInfo {
                name: name.to_string(),
                dimension,
                metric: DistanceMetric::Cosine,
            },
        );
        index
    }

    pub fn created(&self) -> Vec<(String, usize, DistanceMetric)> {
        self.state.lock().created.clone()
    }

    pub fn queries(&self) -> Vec<(String, VectorQuery)> {
        self.state.lock().queries.clone()
    }

    pub fn upserts(&self) -> Vec<(String, Vec<Vec<f32>>, Vec<VectorMetadata>)> {
        self.state.lock().upserts.clone()
    }

    /// Answer every query with these records, ignoring filters
    pub fn set_query_results(&self, results: Vec<VectorMetadata>) {
        self.state.lock().query_results = Some(results);
    }

    pub fn fail_upsert_for(&self, id: &str) {
        self.state.lock().failing_upserts.push(id.to_string());
    }

    pub fn fail_describe_with(&self, f: impl Fn(&str) -> Error + Send + Sync + 'static) {
        *self.fail_describe.lock() = Some(Box::new(f));
    }

    pub fn fail_create_with(&self, f: impl Fn(&str) -> Error + Send + Sync + 'static) {
        *self.fail_create.lock() = Some(Box::new(f));
    }

    pub fn fail_query_with(&self, f: impl Fn(&str) -> Error + Send + Sync + 'static) {
        *self.fail_query.lock() = Some(Box::new(f));
    }
}

#[async_trait]
impl VectorIndex for RecordingVectorIndex {
    async fn describe_index(&self, name: &str) -> Result<IndexInfo> {
        if let Some(f) = self.fail_describe.lock().as_ref() {
            return Err(f(name));
        }
        self.state
            .lock()
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        if let Some(f) = self.fail_create.lock().as_ref() {
            return Err(f(name));
        }
        let mut state = self.state.lock();
        if state.indexes.contains_key(name) {
            return Err(Error::IndexAlreadyExists(name.to_string()));
        }
        state.created.push((name.to_string(), dimension, metric));
        state.indexes.insert(
            name.to_string(),
            IndexInfo {
                name: name.to_string(),
                dimension,
                metric,
            },
        );
        Ok(())
    }

    async fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<QueryMatch>> {
        let mut state = self.state.lock();
        state.queries.push((name.to_string(), query.clone()));

        if let Some(f) = self.fail_query.lock().as_ref() {
            return Err(f(name));
        }

        let metadata: Vec<VectorMetadata> = match &state.query_results {
            Some(results) => results.clone(),
            None => state
                .records
                .iter()
                .filter(|(index, _)| index == name)
                .map(|(_, meta)| meta)
                .filter(|meta| match (query.date_gte, meta.date) {
                    (Some(cutoff), Some(date)) => date >= cutoff,
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .take(query.top_k)
                .cloned()
                .collect(),
        };

        Ok(metadata
            .into_iter()
            .map(|meta| QueryMatch {
                metadata: Some(meta),
            })
            .collect())
    }

    async fn upsert(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<VectorMetadata>,
    ) -> Result<usize> {
        check_upsert_lengths(&vectors, &metadata)?;

        let mut state = self.state.lock();
        if metadata
            .iter()
            .any(|m| state.failing_upserts.contains(&m.id))
        {
            return Err(Error::Other("upsert rejected".to_string()));
        }

        let count = vectors.len();
        state
            .records
            .retain(|(index, meta)| index != name || !metadata.iter().any(|m| m.id == meta.id));
        state
            .records
            .extend(metadata.iter().map(|m| (name.to_string(), m.clone())));
        state.upserts.push((name.to_string(), vectors, metadata));
        Ok(count)
    }
}

// ============================================================================
// Embedder
// ============================================================================

/// Embedder returning constant vectors and recording each batch
pub struct RecordingEmbedder {
    dimension: usize,
    calls: Mutex<Vec<Vec<String>>>,
    short_for: Mutex<Option<String>>,
}

impl RecordingEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(Vec::new()),
            short_for: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Return one vector too few for batches containing `needle`
    pub fn drop_last_vector_for(&self, needle: &str) {
        *self.short_for.lock() = Some(needle.to_string());
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().push(texts.to_vec());

        let mut vectors = vec![vec![0.5; self.dimension]; texts.len()];
        if let Some(needle) = self.short_for.lock().as_deref() {
            if texts.iter().any(|t| t.contains(needle)) {
                vectors.pop();
            }
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Classifier / answerer
// ============================================================================

/// Classifier answering from a subject lookup table
pub struct StubClassifier {
    default: Category,
    by_subject: HashMap<String, Category>,
    failing: Vec<String>,
    calls: Mutex<Vec<(String, String)>>,
    log: Option<CallLog>,
}

impl StubClassifier {
    pub fn always(category: Category) -> Self {
        Self {
            default: category,
            by_subject: HashMap::new(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
            log: None,
        }
    }

    pub fn with(mut self, subject: &str, category: Category) -> Self {
        self.by_subject.insert(subject.to_string(), category);
        self
    }

    /// Answer outside the closed category set for this subject
    pub fn failing_for(mut self, subject: &str) -> Self {
        self.failing.push(subject.to_string());
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, subject: &str, text: &str) -> Result<Category> {
        self.calls
            .lock()
            .push((subject.to_string(), text.to_string()));
        if let Some(log) = &self.log {
            log.lock().push(format!("classify:{}", subject));
        }

        if self.failing.iter().any(|s| s == subject) {
            return "Urgent".parse();
        }
        Ok(self
            .by_subject
            .get(subject)
            .copied()
            .unwrap_or(self.default))
    }
}

/// Answerer returning fixed text
pub struct RecordingAnswerer {
    reply: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingAnswerer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Answerer for RecordingAnswerer {
    async fn answer(&self, subject: &str, text: &str) -> Result<String> {
        self.calls
            .lock()
            .push((subject.to_string(), text.to_string()));
        self.reply
            .clone()
            .ok_or_else(|| Error::Llm("service unavailable".to_string()))
    }
}
