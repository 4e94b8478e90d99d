use std::sync::Arc;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    task_rows_out: CounterVec,
    task_batches_out: CounterVec,
    task_time_seconds: HistogramVec,
    task_failures: CounterVec,
    schemas_registered: CounterVec,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_task(
        &self,
        query_id: &str,
        task: &str,
        rows_out: u64,
        batches_out: u64,
        secs: f64,
    ) {
        let labels = [query_id, task];
        self.inner
            .task_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .task_batches_out
            .with_label_values(&labels)
            .inc_by(batches_out as f64);
        self.inner
            .task_time_seconds
            .with_label_values(&labels)
            .observe(secs);
    }

    pub fn record_task_failure(&self, query_id: &str, task: &str) {
        self.inner
            .task_failures
            .with_label_values(&[query_id, task])
            .inc();
    }

    pub fn record_schema_registered(&self, source_type: &str) {
        self.inner
            .schemas_registered
            .with_label_values(&[source_type])
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.inner.registry.gather(), &mut buf)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let task_labels = &["query_id", "task"];

        let task_rows_out = CounterVec::new(
            Opts::new("fedq_task_rows_out_total", "Rows emitted by a task"),
            task_labels,
        )
        .expect("valid metric definition");
        let task_batches_out = CounterVec::new(
            Opts::new("fedq_task_batches_out_total", "Messages emitted by a task"),
            task_labels,
        )
        .expect("valid metric definition");
        let task_time_seconds = HistogramVec::new(
            HistogramOpts::new("fedq_task_time_seconds", "Wall time of a task run"),
            task_labels,
        )
        .expect("valid metric definition");
        let task_failures = CounterVec::new(
            Opts::new("fedq_task_failures_total", "Tasks that returned an error"),
            task_labels,
        )
        .expect("valid metric definition");
        let schemas_registered = CounterVec::new(
            Opts::new("fedq_schemas_registered_total", "Schemas registered per source type"),
            &["source_type"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(task_rows_out.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(task_batches_out.clone()),
            Box::new(task_time_seconds.clone()),
            Box::new(task_failures.clone()),
            Box::new(schemas_registered.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            task_rows_out,
            task_batches_out,
            task_time_seconds,
            task_failures,
            schemas_registered,
        }
    }
}
