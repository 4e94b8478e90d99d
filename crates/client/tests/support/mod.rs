#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use fedq_client::Engine;
use fedq_common::{EngineConfig, FedqError, Result, SourceConfig};
use fedq_execution::{SendableRecordBatchStream, StreamAdapter, memory_stream};
use fedq_sql::Statement;
use fedq_storage::{Source, SourceRegistry, TableDesc, register_builtin_sources};
use serde_json::{Value, json};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}

fn memtest_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("label", DataType::Utf8, false),
    ]))
}

/// Test backend declaring a single table named after its schema, with rows
/// `(1, "<name>-1")` .. `(3, "<name>-3")`.
#[derive(Default)]
pub struct MemTestSource {
    name: String,
}

impl Source for MemTestSource {
    fn source_type(&self) -> &str {
        "memtest"
    }

    fn setup(&mut self, conf: &SourceConfig) -> Result<()> {
        if conf.settings.contains_key("fail") {
            return Err(FedqError::InvalidConfig("asked to fail".to_string()));
        }
        self.name = conf.name.clone();
        Ok(())
    }

    fn tables(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn table(&self, name: &str) -> Option<TableDesc> {
        name.eq_ignore_ascii_case(&self.name)
            .then(|| TableDesc::new(self.name.clone(), memtest_schema()))
    }

    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
    ) -> Result<SendableRecordBatchStream> {
        if !table.eq_ignore_ascii_case(&self.name) {
            return Err(FedqError::Planning(format!("unknown table: {table}")));
        }
        let labels = (1..=3).map(|i| format!("{}-{i}", self.name)).collect::<Vec<_>>();
        let batch = RecordBatch::try_new(
            memtest_schema(),
            vec![
                Arc::new(Int64Array::from(vec![1_i64, 2, 3])),
                Arc::new(StringArray::from(labels)),
            ],
        )
        .map_err(|e| FedqError::Execution(e.to_string()))?;
        let batch = match projection {
            Some(cols) => {
                let indices = cols
                    .iter()
                    .map(|c| batch.schema().index_of(c))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| FedqError::Planning(e.to_string()))?;
                batch
                    .project(&indices)
                    .map_err(|e| FedqError::Execution(e.to_string()))?
            }
            None => batch,
        };
        Ok(memory_stream(batch.schema(), vec![batch]))
    }
}

/// Backend whose `events` table either fails after its first batch
/// (`"mode": "fail"`) or never ends (`"mode": "endless"`).
#[derive(Default)]
pub struct ScriptedSource {
    endless: bool,
}

fn events_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]))
}

fn events_batch() -> RecordBatch {
    RecordBatch::try_new(
        events_schema(),
        vec![Arc::new(Int64Array::from(vec![1_i64, 2, 3, 4]))],
    )
    .expect("events batch")
}

impl Source for ScriptedSource {
    fn source_type(&self) -> &str {
        "scripted"
    }

    fn setup(&mut self, conf: &SourceConfig) -> Result<()> {
        self.endless = conf.setting_str("mode") == Some("endless");
        Ok(())
    }

    fn tables(&self) -> Vec<String> {
        vec!["events".to_string()]
    }

    fn table(&self, name: &str) -> Option<TableDesc> {
        name.eq_ignore_ascii_case("events")
            .then(|| TableDesc::new("events", events_schema()))
    }

    fn scan(
        &self,
        _table: &str,
        _projection: Option<&[String]>,
    ) -> Result<SendableRecordBatchStream> {
        if self.endless {
            let batches = futures::stream::repeat_with(|| Ok(events_batch()));
            return Ok(Box::pin(StreamAdapter::new(events_schema(), batches)));
        }
        let batches = futures::stream::iter(vec![
            Ok(events_batch()),
            Err(FedqError::Execution("disk on fire".to_string())),
        ]);
        Ok(Box::pin(StreamAdapter::new(events_schema(), batches)))
    }
}

pub fn test_registry() -> Arc<SourceRegistry> {
    let registry = SourceRegistry::new();
    register_builtin_sources(&registry);
    registry.register_source_type(
        "memtest",
        Arc::new(|| Box::new(MemTestSource::default()) as Box<dyn Source>),
    );
    registry.register_source_type(
        "scripted",
        Arc::new(|| Box::new(ScriptedSource::default()) as Box<dyn Source>),
    );
    Arc::new(registry)
}

pub fn engine() -> Engine {
    init_tracing();
    Engine::with_registry(EngineConfig::default(), test_registry()).expect("engine")
}

pub fn shop_source(parent: Option<&str>) -> Value {
    json!({
        "type": "memory",
        "schema": parent,
        "settings": {"tables": {
            "users": {
                "columns": [
                    {"name": "id", "type": "int64", "nullable": false},
                    {"name": "name", "type": "utf8"},
                    {"name": "age", "type": "int64"}
                ],
                "primary_key": ["id"],
                "rows": [[1, "ann", 31], [2, "bob", 25], [3, "cy", 42]]
            },
            "orders": {
                "columns": [
                    {"name": "order_id", "type": "int64", "nullable": false},
                    {"name": "user_id", "type": "int64"},
                    {"name": "total", "type": "float64"}
                ],
                "rows": [[10, 1, 9.5], [11, 2, 20.0], [12, 1, 0.5]]
            }
        }}
    })
}

pub fn create(name: &str, with: Value) -> Statement {
    Statement::create_source(name, with)
}

pub fn int_column(batches: &[RecordBatch], idx: usize) -> Vec<i64> {
    let mut out = Vec::new();
    for b in batches {
        let col = b
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64 column");
        out.extend((0..col.len()).map(|i| col.value(i)));
    }
    out
}

pub fn float_column(batches: &[RecordBatch], idx: usize) -> Vec<f64> {
    let mut out = Vec::new();
    for b in batches {
        let col = b
            .column(idx)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("float64 column");
        out.extend((0..col.len()).map(|i| col.value(i)));
    }
    out
}

pub fn str_column(batches: &[RecordBatch], idx: usize) -> Vec<String> {
    let mut out = Vec::new();
    for b in batches {
        let col = b
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        out.extend((0..col.len()).map(|i| {
            if col.is_null(i) {
                String::new()
            } else {
                col.value(i).to_string()
            }
        }));
    }
    out
}

pub fn rows_affected(batches: &[RecordBatch]) -> u64 {
    assert_eq!(batches.len(), 1, "one result row-message");
    let col = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .expect("rows_affected column");
    col.value(0)
}
