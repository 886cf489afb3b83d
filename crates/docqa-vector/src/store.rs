//! Durable LanceDB copy of a [`VectorIndex`].
//!
//! A location is a directory holding two tables: `fragments` (one row per
//! entry) and `meta` (embedder id, dimension, fragment count). Writes go to a
//! sibling staging directory that is renamed into place once complete.

use anyhow::{anyhow, Context};
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use chrono::Utc;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docqa_core::traits::Embedder;
use docqa_core::types::{Fragment, Meta};
use docqa_core::{Error, Result};

use crate::index::{IndexEntry, VectorIndex};
use crate::schema::{
    build_fragments_schema, build_meta_schema, FRAGMENTS_TABLE, META_CREATED_AT, META_DIM, META_EMBEDDER_ID,
    META_FRAGMENT_COUNT, META_TABLE,
};

pub async fn open_db(location: &Path) -> anyhow::Result<Connection> {
    Ok(connect(location.to_string_lossy().as_ref()).execute().await?)
}

/// True when `location` looks like a persisted index. Does not open it.
pub fn exists(location: &Path) -> bool {
    location.join(format!("{FRAGMENTS_TABLE}.lance")).is_dir() && location.join(format!("{META_TABLE}.lance")).is_dir()
}

/// Write `index` to `location`, replacing whatever is there. On failure the
/// previous contents of `location` are left in place.
pub async fn persist(index: &VectorIndex, location: &Path) -> Result<()> {
    let (parent, name) = split_location(location);
    tokio::fs::create_dir_all(&parent).await?;
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let staging = parent.join(format!(".{name}.staging-{stamp}"));
    let backup = parent.join(format!(".{name}.old-{stamp}"));

    if let Err(e) = write_tables(index, &staging).await {
        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            discard(&staging).await;
        }
        return Err(Error::Internal(format!("failed to write index to {}: {e:#}", staging.display())));
    }

    let target = location.to_path_buf();
    tokio::task::spawn_blocking(move || swap_into_place(&staging, &target, &backup))
        .await
        .map_err(|e| Error::Internal(format!("index swap panicked: {e}")))??;
    tracing::info!(fragments = index.len(), path = %location.display(), "persisted vector index");
    Ok(())
}

/// Move `staging` to `location`, parking the previous contents at `backup`
/// until the move has succeeded. `staging` is gone afterwards either way.
fn swap_into_place(staging: &Path, location: &Path, backup: &Path) -> Result<()> {
    let had_previous = location.exists();
    if had_previous {
        if let Err(e) = std::fs::rename(location, backup) {
            remove_dir_logged(staging);
            return Err(Error::Io(e));
        }
    }
    if let Err(e) = std::fs::rename(staging, location) {
        if had_previous {
            if let Err(undo) = std::fs::rename(backup, location) {
                tracing::error!(
                    backup = %backup.display(),
                    path = %location.display(),
                    error = %undo,
                    "could not move previous index back"
                );
            }
        }
        remove_dir_logged(staging);
        return Err(Error::Io(e));
    }
    if had_previous {
        remove_dir_logged(backup);
    }
    Ok(())
}

async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::warn!(path = %dir.display(), error = %e, "could not remove index directory");
    }
}

fn remove_dir_logged(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "could not remove index directory");
    }
}

/// Load the index at `location`. The stored embedder id and dimension must
/// match `embedder`.
pub async fn restore(location: &Path, embedder: &dyn Embedder) -> Result<VectorIndex> {
    if !exists(location) {
        return Err(Error::IndexNotFound(location.to_path_buf()));
    }
    let index = read_tables(location)
        .await
        .map_err(|e| Error::IndexCorrupt(format!("{}: {e:#}", location.display())))?;
    if index.embedder_id() != embedder.id() || index.dim() != embedder.dim() {
        return Err(Error::IndexCorrupt(format!(
            "index at {} was built with '{}' (d{}), active embedder is '{}' (d{})",
            location.display(),
            index.embedder_id(),
            index.dim(),
            embedder.id(),
            embedder.dim()
        )));
    }
    tracing::info!(fragments = index.len(), path = %location.display(), "restored vector index");
    Ok(index)
}

fn split_location(location: &Path) -> (PathBuf, String) {
    let parent = match location.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = location
        .file_name()
        .map_or_else(|| "index".to_string(), |n| n.to_string_lossy().into_owned());
    (parent, name)
}

async fn write_tables(index: &VectorIndex, dir: &Path) -> anyhow::Result<()> {
    let db = open_db(dir).await?;
    let dim = i32::try_from(index.dim()).context("dimension does not fit the Arrow schema")?;

    let schema = build_fragments_schema(dim);
    let batch = fragments_batch(index, dim, schema.clone())?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    db.create_table(FRAGMENTS_TABLE, reader).execute().await?;

    let meta = [
        (META_EMBEDDER_ID, index.embedder_id().to_string()),
        (META_DIM, index.dim().to_string()),
        (META_FRAGMENT_COUNT, index.len().to_string()),
        (META_CREATED_AT, Utc::now().to_rfc3339()),
    ];
    let now = Utc::now().timestamp_millis();
    let batch = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from_iter_values(meta.iter().map(|(k, _)| *k))),
            Arc::new(StringArray::from_iter_values(meta.iter().map(|(_, v)| v.as_str()))),
            Arc::new(TimestampMillisecondArray::from(vec![now; meta.len()])),
        ],
    )?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), build_meta_schema()));
    db.create_table(META_TABLE, reader).execute().await?;
    Ok(())
}

fn fragments_batch(index: &VectorIndex, dim: i32, schema: Arc<arrow_schema::Schema>) -> anyhow::Result<RecordBatch> {
    let entries = index.entries();
    let mut idx = Vec::with_capacity(entries.len());
    let mut starts = Vec::with_capacity(entries.len());
    let mut ends = Vec::with_capacity(entries.len());
    let mut texts = Vec::with_capacity(entries.len());
    let mut metadata = Vec::with_capacity(entries.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(entries.len());
    for e in entries {
        idx.push(i64::try_from(e.fragment.index)?);
        starts.push(i64::try_from(e.fragment.start)?);
        ends.push(i64::try_from(e.fragment.end)?);
        texts.push(e.fragment.text.as_str());
        metadata.push(serde_json::to_string(&e.fragment.metadata)?);
        vectors.push(Some(e.vector.iter().map(|&x| Some(x)).collect()));
    }
    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(idx)),
            Arc::new(Int64Array::from(starts)),
            Arc::new(Int64Array::from(ends)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
        ],
    )?)
}

async fn read_tables(location: &Path) -> anyhow::Result<VectorIndex> {
    let db = open_db(location).await?;
    let meta = read_meta(&db).await?;
    let field = |key: &str| meta.get(key).ok_or_else(|| anyhow!("meta key '{key}' missing"));
    let embedder_id = field(META_EMBEDDER_ID)?.clone();
    let dim: usize = field(META_DIM)?.parse().context("meta 'dim' is not a number")?;
    let count: usize = field(META_FRAGMENT_COUNT)?.parse().context("meta 'fragment_count' is not a number")?;

    let table = db.open_table(FRAGMENTS_TABLE).execute().await?;
    let mut stream = table.query().limit(count.max(1)).execute().await?;
    let mut entries = Vec::with_capacity(count);
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        decode_fragments(&batch, dim, &mut entries)?;
    }
    if entries.len() != count {
        return Err(anyhow!("meta records {count} fragments, table holds {}", entries.len()));
    }
    entries.sort_by_key(|e| e.fragment.index);
    Ok(VectorIndex::from_entries(embedder_id, dim, entries)?)
}

async fn read_meta(db: &Connection) -> anyhow::Result<HashMap<String, String>> {
    let table = db.open_table(META_TABLE).execute().await?;
    let mut stream = table.query().execute().await?;
    let mut meta = HashMap::new();
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        let keys = column::<StringArray>(&batch, "key")?;
        let values = column::<StringArray>(&batch, "value")?;
        for i in 0..batch.num_rows() {
            meta.insert(keys.value(i).to_string(), values.value(i).to_string());
        }
    }
    Ok(meta)
}

fn decode_fragments(batch: &RecordBatch, dim: usize, out: &mut Vec<IndexEntry>) -> anyhow::Result<()> {
    let idx = column::<Int64Array>(batch, "idx")?;
    let starts = column::<Int64Array>(batch, "start")?;
    let ends = column::<Int64Array>(batch, "end")?;
    let texts = column::<StringArray>(batch, "text")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    for i in 0..batch.num_rows() {
        if vectors.is_null(i) {
            return Err(anyhow!("fragment row {i} has no vector"));
        }
        let values = vectors.value(i);
        let values = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow!("vector column is not f32"))?;
        if values.len() != dim {
            return Err(anyhow!("vector of row {i} has {} components, expected {dim}", values.len()));
        }
        let meta: Meta = serde_json::from_str(metadata.value(i)).context("fragment metadata is not valid JSON")?;
        out.push(IndexEntry {
            fragment: Fragment {
                index: usize::try_from(idx.value(i))?,
                start: usize::try_from(starts.value(i))?,
                end: usize::try_from(ends.value(i))?,
                text: texts.value(i).to_string(),
                metadata: meta,
            },
            vector: values.values().to_vec(),
        });
    }
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("column '{name}' missing or of unexpected type"))
}
