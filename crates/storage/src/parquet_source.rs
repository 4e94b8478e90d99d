use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use fedq_common::{FedqError, Result, SourceConfig};
use fedq_execution::{SendableRecordBatchStream, StreamAdapter};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;
use tracing::debug;

use crate::source::{Source, TableDesc};

const DEFAULT_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone)]
struct ParquetTable {
    desc: TableDesc,
    path: PathBuf,
}

/// Read-only backend over local parquet files.
///
/// Settings: `{"tables": {"t": "/path/t.parquet"}}` and/or `{"dir": "/path"}`
/// (every `*.parquet` file becomes a table named after its file stem).
/// `batch_size` overrides the reader batch size.
#[derive(Debug)]
pub struct ParquetSource {
    tables: BTreeMap<String, ParquetTable>,
    batch_size: usize,
}

impl Default for ParquetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ParquetSource {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    fn add_table(&mut self, name: &str, path: PathBuf) -> Result<()> {
        let file = File::open(&path).map_err(|e| {
            FedqError::InvalidConfig(format!("cannot open parquet file {}: {e}", path.display()))
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            FedqError::InvalidConfig(format!(
                "parquet metadata read failed for {}: {e}",
                path.display()
            ))
        })?;
        let schema = builder.schema().clone();
        debug!(
            table = %name,
            path = %path.display(),
            columns = schema.fields().len(),
            "parquet table registered"
        );
        self.tables.insert(
            name.to_lowercase(),
            ParquetTable {
                desc: TableDesc::new(name, schema),
                path,
            },
        );
        Ok(())
    }

    fn add_dir(&mut self, dir: &Path, conf: &SourceConfig) -> Result<()> {
        let mut paths = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
            .collect::<Vec<_>>();
        paths.sort();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if !conf.exposes(&stem) {
                continue;
            }
            self.add_table(&stem, path)?;
        }
        Ok(())
    }
}

impl Source for ParquetSource {
    fn source_type(&self) -> &str {
        "parquet"
    }

    fn setup(&mut self, conf: &SourceConfig) -> Result<()> {
        if let Some(size) = conf.settings.get("batch_size") {
            self.batch_size = size
                .as_u64()
                .filter(|s| *s > 0)
                .ok_or_else(|| FedqError::InvalidConfig(format!("invalid batch_size: {size}")))?
                as usize;
        }
        if let Some(tables) = conf.settings.get("tables") {
            let Value::Object(map) = tables else {
                return Err(FedqError::InvalidConfig(
                    "parquet settings.tables must map table names to file paths".to_string(),
                ));
            };
            for (name, path) in map.iter().filter(|(name, _)| conf.exposes(name)) {
                let path = path.as_str().ok_or_else(|| {
                    FedqError::InvalidConfig(format!("parquet table {name}: path must be a string"))
                })?;
                self.add_table(name, PathBuf::from(path))?;
            }
        }
        if let Some(dir) = conf.setting_str("dir") {
            self.add_dir(Path::new(dir), conf)?;
        }
        if self.tables.is_empty() {
            return Err(FedqError::InvalidConfig(
                "parquet source declares no tables (set settings.tables or settings.dir)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn tables(&self) -> Vec<String> {
        self.tables.values().map(|t| t.desc.name.clone()).collect()
    }

    fn table(&self, name: &str) -> Option<TableDesc> {
        self.tables.get(&name.to_lowercase()).map(|t| t.desc.clone())
    }

    fn scan(
        &self,
        table: &str,
        projection: Option<&[String]>,
    ) -> Result<SendableRecordBatchStream> {
        let t = self
            .tables
            .get(&table.to_lowercase())
            .ok_or_else(|| FedqError::Planning(format!("unknown table: {table}")))?;

        let file = File::open(&t.path)?;
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| FedqError::Execution(format!("parquet reader build failed: {e}")))?
            .with_batch_size(self.batch_size);

        let mut reorder = None;
        if let Some(columns) = projection {
            let full: SchemaRef = builder.schema().clone();
            let indices = columns
                .iter()
                .map(|c| {
                    full.index_of(c).map_err(|_| {
                        FedqError::Planning(format!("unknown column {c} in table {table}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices.iter().copied());
            builder = builder.with_projection(mask);

            // the reader returns masked columns in file order
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let order = indices
                .iter()
                .map(|i| sorted.iter().position(|s| s == i).unwrap_or_default())
                .collect::<Vec<_>>();
            let schema = Arc::new(full.project(&indices).map_err(|e| {
                FedqError::Execution(format!("parquet projection failed: {e}"))
            })?);
            reorder = Some((order, schema));
        }

        let reader = builder
            .build()
            .map_err(|e| FedqError::Execution(format!("parquet reader open failed: {e}")))?;
        let out_schema = match &reorder {
            Some((_, schema)) => schema.clone(),
            None => t.desc.schema.clone(),
        };

        let batches = reader.map(move |batch| {
            let batch =
                batch.map_err(|e| FedqError::Execution(format!("parquet decode failed: {e}")))?;
            match &reorder {
                Some((order, schema)) => {
                    let columns = order.iter().map(|i| batch.column(*i).clone()).collect();
                    RecordBatch::try_new(schema.clone(), columns).map_err(|e| {
                        FedqError::Execution(format!("parquet projection failed: {e}"))
                    })
                }
                None => Ok(batch),
            }
        });

        Ok(Box::pin(StreamAdapter::new(
            out_schema,
            futures::stream::iter(batches),
        )))
    }
}
