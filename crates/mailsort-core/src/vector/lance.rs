//! LanceDB-backed vector index
//!
//! Each index is a LanceDB table with one row per vector:
//! `key` (`<id>#<chunk>`), `id`, `chunk`, `date`, `content` and a
//! fixed-size `vector` column. The distance metric is stored in the table's
//! schema metadata under `mailsort.metric`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lance_arrow::FixedSizeListArrayExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, Table};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{
    check_upsert_lengths, DistanceMetric, IndexInfo, QueryMatch, VectorIndex, VectorMetadata,
    VectorQuery,
};
use crate::error::{Error, Result};

/// Schema metadata key holding the index metric
const METRIC_KEY: &str = "mailsort.metric";

/// Vector column name
const VECTOR_COLUMN: &str = "vector";

/// Table schema for an index of the given dimension
pub fn index_schema(dimension: usize, metric: DistanceMetric) -> Schema {
    let metadata: HashMap<String, String> =
        [(METRIC_KEY.to_string(), metric.as_str().to_string())].into();

    Schema::new_with_metadata(
        vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("id", DataType::Utf8, false),
            Field::new("chunk", DataType::UInt32, false),
            Field::new("date", DataType::Int64, true), // epoch millis
            Field::new("content", DataType::Utf8, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                true,
            ),
        ],
        metadata,
    )
}

/// Read dimension and metric back from a table schema
fn info_from_schema(name: &str, schema: &Schema) -> Result<IndexInfo> {
    let field = schema
        .field_with_name(VECTOR_COLUMN)
        .map_err(|_| Error::Other(format!("table {} has no {} column", name, VECTOR_COLUMN)))?;

    let dimension = match field.data_type() {
        DataType::FixedSizeList(_, size) => *size as usize,
        other => {
            return Err(Error::Other(format!(
                "table {} has unexpected vector type {:?}",
                name, other
            )))
        }
    };

    let metric = schema
        .metadata()
        .get(METRIC_KEY)
        .map(|m| m.parse::<DistanceMetric>())
        .transpose()?
        .unwrap_or(DistanceMetric::Cosine);

    Ok(IndexInfo {
        name: name.to_string(),
        dimension,
        metric,
    })
}

/// Convert vectors and metadata to a record batch
fn records_to_batch(
    schema: SchemaRef,
    dimension: usize,
    vectors: &[Vec<f32>],
    metadata: &[VectorMetadata],
) -> Result<RecordBatch> {
    let mut next_chunk: HashMap<&str, u32> = HashMap::new();
    let chunks: Vec<u32> = metadata
        .iter()
        .map(|m| {
            let n = next_chunk.entry(m.id.as_str()).or_insert(0);
            let chunk = *n;
            *n += 1;
            chunk
        })
        .collect();

    let keys: Vec<String> = metadata
        .iter()
        .zip(&chunks)
        .map(|(m, c)| format!("{}#{}", m.id, c))
        .collect();
    let ids: Vec<&str> = metadata.iter().map(|m| m.id.as_str()).collect();
    let dates: Vec<Option<i64>> = metadata.iter().map(|m| m.date).collect();
    let contents: Vec<&str> = metadata.iter().map(|m| m.content.as_str()).collect();

    let mut values = Vec::with_capacity(vectors.len() * dimension);
    for (vector, meta) in vectors.iter().zip(metadata) {
        if vector.len() != dimension {
            return Err(Error::ContractViolation(format!(
                "vector for {} has dimension {}, index expects {}",
                meta.id,
                vector.len(),
                dimension
            )));
        }
        values.extend_from_slice(vector);
    }
    let vector_array =
        FixedSizeListArray::try_new_from_values(Float32Array::from(values), dimension as i32)?;

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(keys)),
        Arc::new(StringArray::from(ids)),
        Arc::new(UInt32Array::from(chunks)),
        Arc::new(Int64Array::from(dates)),
        Arc::new(StringArray::from(contents)),
        Arc::new(vector_array),
    ];

    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Convert query result batches to matches
fn batches_to_matches(batches: &[RecordBatch]) -> Vec<QueryMatch> {
    let mut matches = Vec::new();

    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let dates = batch
            .column_by_name("date")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>());
        let contents = batch
            .column_by_name("content")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());

        for row in 0..batch.num_rows() {
            let metadata = ids.map(|ids| VectorMetadata {
                id: ids.value(row).to_string(),
                date: dates.filter(|d| !d.is_null(row)).map(|d| d.value(row)),
                content: contents
                    .map(|c| c.value(row).to_string())
                    .unwrap_or_default(),
            });

            matches.push(QueryMatch { metadata });
        }
    }

    matches
}

/// Vector index stored in a LanceDB database
pub struct LanceVectorIndex {
    connection: Connection,
    tables: RwLock<HashMap<String, (Table, IndexInfo)>>,
}

impl LanceVectorIndex {
    /// Open or create a database at the given URI
    pub async fn open(uri: &str) -> Result<Self> {
        info!("Opening LanceDB at {}", uri);

        // Local paths are created; remote URIs are left to LanceDB
        if !uri.contains("://") {
            std::fs::create_dir_all(uri)?;
        }

        let connection = connect(uri).execute().await?;

        Ok(Self {
            connection,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Table handle and shape for an index, opened once and cached
    async fn table(&self, name: &str) -> Result<(Table, IndexInfo)> {
        if let Some(entry) = self.tables.read().get(name).cloned() {
            return Ok(entry);
        }

        let table_names = self.connection.table_names().execute().await?;
        if !table_names.iter().any(|t| t == name) {
            return Err(Error::IndexNotFound(name.to_string()));
        }

        let table = self.connection.open_table(name).execute().await?;
        let schema = table.schema().await?;
        let info = info_from_schema(name, &schema)?;

        self.tables
            .write()
            .insert(name.to_string(), (table.clone(), info.clone()));
        Ok((table, info))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn describe_index(&self, name: &str) -> Result<IndexInfo> {
        let (_, info) = self.table(name).await?;
        Ok(info)
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        let table_names = self.connection.table_names().execute().await?;
        if table_names.iter().any(|t| t == name) {
            return Err(Error::IndexAlreadyExists(name.to_string()));
        }

        let schema: SchemaRef = Arc::new(index_schema(dimension, metric));
        let batch = records_to_batch(schema.clone(), dimension, &[], &[])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = match self
            .connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => table,
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                return Err(Error::IndexAlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        info!("Created index {} (dimension {}, metric {})", name, dimension, metric);

        let info = IndexInfo {
            name: name.to_string(),
            dimension,
            metric,
        };
        self.tables.write().insert(name.to_string(), (table, info));
        Ok(())
    }

    async fn query(&self, name: &str, query: &VectorQuery) -> Result<Vec<QueryMatch>> {
        if !query.is_metadata_scan() {
            return Err(Error::Other(format!(
                "index {} only supports metadata scans (all-zero query vector)",
                name
            )));
        }

        let (table, _) = self.table(name).await?;

        // No similarity signal; scan the filtered rows and order by date
        let mut scan = table
            .query()
            .select(Select::columns(&["id", "date", "content"]));
        if let Some(cutoff) = query.date_gte {
            scan = scan.only_if(&format!("date >= {}", cutoff));
        }
        let batches: Vec<RecordBatch> = scan.execute().await?.try_collect().await?;

        let mut matches = batches_to_matches(&batches);
        matches.sort_by(|a, b| {
            let date = |m: &QueryMatch| m.metadata.as_ref().and_then(|md| md.date);
            date(b).cmp(&date(a))
        });
        matches.truncate(query.top_k);

        if !query.include_metadata {
            for m in &mut matches {
                m.metadata = None;
            }
        }

        debug!("Query on {} returned {} matches", name, matches.len());
        Ok(matches)
    }

    async fn upsert(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<VectorMetadata>,
    ) -> Result<usize> {
        check_upsert_lengths(&vectors, &metadata)?;
        if vectors.is_empty() {
            return Ok(0);
        }

        let (table, info) = self.table(name).await?;
        let schema: SchemaRef = Arc::new(index_schema(info.dimension, info.metric));
        let batch = records_to_batch(schema.clone(), info.dimension, &vectors, &metadata)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        // Rows of these emails that the new batch does not overwrite are stale
        let mut ids: Vec<String> = metadata
            .iter()
            .map(|m| format!("'{}'", m.id.replace('\'', "''")))
            .collect();
        ids.sort();
        ids.dedup();
        let stale = format!("id IN ({})", ids.join(", "));

        // One commit: a failed write leaves the previous rows in place
        let mut merge = table.merge_insert(&["key"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all()
            .when_not_matched_by_source_delete(Some(stale));
        merge.execute(Box::new(batches)).await?;

        debug!("Upserted {} vectors into {}", vectors.len(), name);
        Ok(vectors.len())
    }
}
