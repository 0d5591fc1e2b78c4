// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Parquet snapshot I/O over the object store.
//!
//! A snapshot is a directory of Parquet files. Slot snapshots (head/tail)
//! carry one Utf8 column per primary-key column (the rendered literal),
//! plus `ts` (writetime epoch millis, 0 when disabled) and `group` (the tile
//! group). Staged CDC snapshots carry `op`, `pk` (a JSON object of rendered
//! literals), `ts`, `dt` and `seq`.
//!
//! Files are assembled in memory and moved as whole objects; datasets are
//! overwritten in place by deleting the directory first.

use crate::cdc::{CdcEvent, MirrorOp};
use crate::error::{MirrorError, Result};
use crate::tile::PrimaryKey;
use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::sync::Arc;

/// One primary-key row of a slot snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub pk: PrimaryKey,
    /// Writetime in epoch millis; 0 when the writetime column is disabled.
    pub ts: i64,
}

impl SnapshotRow {
    pub fn new(pk: PrimaryKey, ts: i64) -> Self {
        Self { pk, ts }
    }

    /// Stable row identity: the canonical pk join.
    pub fn key(&self) -> String {
        self.pk.joined()
    }
}

/// Encode rows into one Parquet object at `file`.
///
/// Returns the row count written.
pub async fn write_rows(
    store: &Arc<dyn ObjectStore>,
    file: &Path,
    pk_columns: &[String],
    rows: &[SnapshotRow],
    total_tiles: u32,
) -> Result<usize> {
    let mut fields: Vec<Field> = pk_columns
        .iter()
        .map(|c| Field::new(c.as_str(), DataType::Utf8, true))
        .collect();
    fields.push(Field::new("ts", DataType::Int64, false));
    fields.push(Field::new("group", DataType::Int64, false));
    let schema = Arc::new(Schema::new(fields));

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(pk_columns.len() + 2);
    for col in pk_columns {
        let values: Vec<Option<&str>> = rows.iter().map(|r| r.pk.get(col)).collect();
        arrays.push(Arc::new(StringArray::from(values)));
    }
    arrays.push(Arc::new(Int64Array::from(
        rows.iter().map(|r| r.ts).collect::<Vec<_>>(),
    )));
    arrays.push(Arc::new(Int64Array::from(
        rows.iter()
            .map(|r| i64::from(r.pk.tile_for(total_tiles)))
            .collect::<Vec<_>>(),
    )));

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let buf = encode_parquet(schema, &batch)?;
    store.put(file, buf.into()).await?;
    Ok(rows.len())
}

/// Read every Parquet file under `prefix` back into rows.
///
/// `pk_columns` names the expected key schema; other columns are ignored.
pub async fn read_rows(
    store: &Arc<dyn ObjectStore>,
    prefix: &Path,
    pk_columns: &[String],
) -> Result<Vec<SnapshotRow>> {
    let mut rows = Vec::new();
    for file in list_files(store, prefix).await? {
        let bytes = store.get(&file).await?.bytes().await?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        for batch in reader {
            let batch = batch?;
            decode_row_batch(&batch, pk_columns, &mut rows)?;
        }
    }
    Ok(rows)
}

fn decode_row_batch(
    batch: &RecordBatch,
    pk_columns: &[String],
    out: &mut Vec<SnapshotRow>,
) -> Result<()> {
    let ts_col = batch
        .column_by_name("ts")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>().cloned());
    let mut pk_arrays = Vec::with_capacity(pk_columns.len());
    for col in pk_columns {
        let array = batch
            .column_by_name(col)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned())
            .ok_or_else(|| {
                MirrorError::Snapshot(format!("snapshot is missing pk column '{}'", col))
            })?;
        pk_arrays.push((col.clone(), array));
    }
    for i in 0..batch.num_rows() {
        let mut pk = PrimaryKey::new();
        for (col, array) in &pk_arrays {
            if !array.is_null(i) {
                pk.insert(col.clone(), array.value(i).to_string());
            }
        }
        let ts = ts_col.as_ref().map(|c| c.value(i)).unwrap_or(0);
        out.push(SnapshotRow::new(pk, ts));
    }
    Ok(())
}

/// Encode CDC events into one Parquet object at `file`.
pub async fn write_events(
    store: &Arc<dyn ObjectStore>,
    file: &Path,
    events: &[CdcEvent],
) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("op", DataType::Utf8, false),
        Field::new("pk", DataType::Utf8, false),
        Field::new("ts", DataType::Int64, false),
        Field::new("dt", DataType::Utf8, false),
        Field::new("seq", DataType::Int64, false),
    ]));
    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            events.iter().map(|e| e.op.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            events
                .iter()
                .map(|e| e.pk.to_json_string())
                .collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            events.iter().map(|e| e.ts).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            events.iter().map(|e| e.dt.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            events.iter().map(|e| i64::from(e.seq)).collect::<Vec<_>>(),
        )),
    ];
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let buf = encode_parquet(schema, &batch)?;
    store.put(file, buf.into()).await?;
    Ok(events.len())
}

/// Read every staged CDC event under `prefix`.
pub async fn read_events(store: &Arc<dyn ObjectStore>, prefix: &Path) -> Result<Vec<CdcEvent>> {
    let mut events = Vec::new();
    for file in list_files(store, prefix).await? {
        let bytes = store.get(&file).await?.bytes().await?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        for batch in reader {
            let batch = batch?;
            decode_event_batch(&batch, &mut events)?;
        }
    }
    Ok(events)
}

fn decode_event_batch(batch: &RecordBatch, out: &mut Vec<CdcEvent>) -> Result<()> {
    let get_str = |name: &str| -> Result<StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned())
            .ok_or_else(|| MirrorError::Snapshot(format!("event snapshot missing '{}'", name)))
    };
    let get_i64 = |name: &str| -> Result<Int64Array> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>().cloned())
            .ok_or_else(|| MirrorError::Snapshot(format!("event snapshot missing '{}'", name)))
    };
    let op = get_str("op")?;
    let pk = get_str("pk")?;
    let ts = get_i64("ts")?;
    let dt = get_str("dt")?;
    let seq = get_i64("seq")?;
    for i in 0..batch.num_rows() {
        let parsed_op = MirrorOp::from_str_op(op.value(i)).ok_or_else(|| {
            MirrorError::Snapshot(format!("unknown op '{}' in event snapshot", op.value(i)))
        })?;
        let parsed_pk = PrimaryKey::from_json_str(pk.value(i))
            .map_err(|e| MirrorError::Snapshot(format!("bad pk JSON: {}", e)))?;
        let parsed_dt: NaiveDate = dt
            .value(i)
            .parse()
            .map_err(|e| MirrorError::Snapshot(format!("bad dt '{}': {}", dt.value(i), e)))?;
        out.push(CdcEvent {
            op: parsed_op,
            pk: parsed_pk,
            ts: ts.value(i),
            dt: parsed_dt,
            seq: seq.value(i) as u32,
        });
    }
    Ok(())
}

/// Copy every object under `from` to the same relative key under `to`.
pub async fn copy_dir(store: &Arc<dyn ObjectStore>, from: &Path, to: &Path) -> Result<usize> {
    let mut copied = 0;
    for file in list_files(store, from).await? {
        let relative = file
            .as_ref()
            .strip_prefix(from.as_ref())
            .map(|s| s.trim_start_matches('/'))
            .unwrap_or_default();
        let dst = Path::from(format!("{}/{}", to.as_ref(), relative));
        store.copy(&file, &dst).await?;
        copied += 1;
    }
    Ok(copied)
}

/// Delete every object under `prefix`.
pub async fn delete_dir(store: &Arc<dyn ObjectStore>, prefix: &Path) -> Result<usize> {
    let mut deleted = 0;
    for file in list_files(store, prefix).await? {
        store.delete(&file).await?;
        deleted += 1;
    }
    Ok(deleted)
}

async fn list_files(store: &Arc<dyn ObjectStore>, prefix: &Path) -> Result<Vec<Path>> {
    let mut files: Vec<Path> = store
        .list(Some(prefix))
        .map_ok(|meta| meta.location)
        .try_collect()
        .await?;
    files.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    Ok(files)
}

fn encode_parquet(schema: Arc<Schema>, batch: &RecordBatch) -> Result<Bytes> {
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(buf))
}
