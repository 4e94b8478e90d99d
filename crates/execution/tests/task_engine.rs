use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use fedq_common::{FedqError, MetricsRegistry, QueryId, Result};
use fedq_execution::{
    AggregateSpec, AggregateTask, BatchWriter, BoxedTask, FilterTask, HashJoinTask, LimitTask,
    MutateTask, ParallelTask, ProjectionTask, SequentialTask, SharedTaskContext, SourceTask,
    StaticTask, StreamAdapter, Task, TaskContext, TaskHandle, TaskSender, spawn_task,
};
use fedq_sql::{AggFunc, BinaryOp, Expr, LiteralValue};
use futures::StreamExt;
use futures::future::BoxFuture;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn ctx() -> SharedTaskContext {
    init_tracing();
    TaskContext::new(QueryId::next(), 2, 1024).into_shared()
}

fn int_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

fn int_batch(vals: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(int_schema(), vec![Arc::new(Int64Array::from(vals))]).expect("batch")
}

fn static_ints(name: &str, batches: Vec<Vec<i64>>) -> BoxedTask {
    Box::new(StaticTask::new(
        name,
        batches.into_iter().map(int_batch).collect(),
    ))
}

async fn drain(mut handle: TaskHandle) -> (Vec<RecordBatch>, Result<()>) {
    let mut out = Vec::new();
    while let Some(batch) = handle.recv().await {
        out.push(batch);
    }
    (out, handle.finish().await)
}

fn ints(batches: &[RecordBatch], col: usize) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| {
            b.column(col)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64 column")
                .values()
                .to_vec()
        })
        .collect()
}

/// Emits two-row batches until its consumer stops accepting them.
struct EndlessTask;

impl Task for EndlessTask {
    fn name(&self) -> &str {
        "endless"
    }

    fn run(&mut self, _ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut next = 0;
            loop {
                if !out.send(int_batch(vec![next, next + 1])).await {
                    return Ok(());
                }
                next += 2;
            }
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sends one batch, then fails.
struct FailingTask;

impl Task for FailingTask {
    fn name(&self) -> &str {
        "failing"
    }

    fn run(&mut self, _ctx: SharedTaskContext, mut out: TaskSender) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            out.send(int_batch(vec![42])).await;
            Err(FedqError::Execution("backend went away".to_string()))
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counts run invocations and effective releases.
#[derive(Clone, Default)]
struct Usage {
    runs: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

struct TrackedTask {
    usage: Usage,
    resource: Option<()>,
}

impl TrackedTask {
    fn boxed(usage: &Usage) -> BoxedTask {
        Box::new(Self {
            usage: usage.clone(),
            resource: Some(()),
        })
    }
}

impl Task for TrackedTask {
    fn name(&self) -> &str {
        "tracked"
    }

    fn run(&mut self, _ctx: SharedTaskContext, _out: TaskSender) -> BoxFuture<'_, Result<()>> {
        self.usage.runs.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> Result<()> {
        if self.resource.take().is_some() {
            self.usage.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn channel_closes_once_run_returns() {
    let ctx = ctx();
    let mut handle = spawn_task(static_ints("rows", vec![vec![1, 2], vec![3]]), ctx);
    let mut seen = Vec::new();
    while let Some(batch) = handle.recv().await {
        seen.push(batch);
    }
    assert_eq!(ints(&seen, 0), vec![1, 2, 3]);
    let after = tokio::time::timeout(Duration::from_millis(200), handle.recv())
        .await
        .expect("reading a closed channel must not block");
    assert!(after.is_none());
    handle.finish().await.expect("static task ok");
}

#[tokio::test]
async fn sequential_concatenates_in_child_order() {
    let ctx = ctx();
    let seq = SequentialTask::new(
        "union_all",
        vec![
            static_ints("a", vec![vec![1, 2], vec![3]]),
            static_ints("b", vec![vec![4]]),
            static_ints("c", vec![vec![5, 6]]),
        ],
    );
    let (batches, res) = drain(spawn_task(Box::new(seq), ctx)).await;
    res.expect("sequential ok");
    assert_eq!(ints(&batches, 0), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn sequential_failure_aborts_remaining_children() {
    let ctx = ctx();
    let usage = Usage::default();
    let seq = SequentialTask::new(
        "union_all",
        vec![Box::new(FailingTask), TrackedTask::boxed(&usage)],
    );
    let (_, res) = drain(spawn_task(Box::new(seq), ctx.clone())).await;
    let err = res.expect_err("failure surfaces");
    assert!(err.to_string().contains("backend went away"));
    assert_eq!(usage.runs.load(Ordering::SeqCst), 0);
    assert_eq!(usage.releases.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.failure().expect("recorded").task, "failing");
}

#[tokio::test]
async fn parallel_yields_every_row_exactly_once() {
    let ctx = ctx();
    let children = (0..4)
        .map(|c| {
            let batches = (0..5)
                .map(|b| vec![c * 100 + b * 2, c * 100 + b * 2 + 1])
                .collect();
            static_ints(&format!("part{c}"), batches)
        })
        .collect();
    let fan_out = Box::new(ParallelTask::new("fan_out", children));
    let (batches, res) = drain(spawn_task(fan_out, ctx)).await;
    res.expect("parallel ok");

    let all = ints(&batches, 0);
    let mut sorted = all.clone();
    sorted.sort();
    let expected = (0..4)
        .flat_map(|c| (0..10).map(move |i| c * 100 + i))
        .collect::<Vec<_>>();
    assert_eq!(sorted, expected);

    // each child's own order survives the merge
    for c in 0..4 {
        let from_child = all.iter().copied().filter(|v| v / 100 == c).collect::<Vec<_>>();
        let mut ordered = from_child.clone();
        ordered.sort();
        assert_eq!(from_child, ordered);
    }
}

#[tokio::test]
async fn cancel_unwinds_blocked_writers_and_unstarted_children() {
    let ctx = ctx();
    let usage = Usage::default();
    let tree = ParallelTask::new(
        "fan_out",
        vec![
            Box::new(EndlessTask),
            Box::new(SequentialTask::new(
                "seq",
                vec![Box::new(EndlessTask), TrackedTask::boxed(&usage)],
            )),
        ],
    );
    let mut handle = spawn_task(Box::new(tree), ctx.clone());
    assert!(handle.recv().await.is_some());

    ctx.cancel();
    let res = tokio::time::timeout(Duration::from_secs(2), handle.finish())
        .await
        .expect("tree terminates after cancel");
    res.expect("cancellation is not a failure");
    assert!(ctx.failure().is_none());
    assert_eq!(usage.runs.load(Ordering::SeqCst), 0);
    assert_eq!(usage.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn leaf_failure_stops_siblings_and_reaches_the_root() {
    let ctx = ctx();
    let tree = ParallelTask::new("fan_out", vec![Box::new(EndlessTask), Box::new(FailingTask)]);
    let handle = spawn_task(Box::new(tree), ctx.clone());
    let (_, res) = tokio::time::timeout(Duration::from_secs(2), drain(handle))
        .await
        .expect("no parent blocks on a failed producer");
    let err = res.expect_err("error is not reported as success");
    assert!(err.to_string().contains("backend went away"));
    assert!(ctx.is_cancelled());
}

#[tokio::test]
async fn limit_stops_input_early_without_failing() {
    let ctx = ctx();
    let limit = LimitTask::new(Box::new(EndlessTask), 5);
    let handle = spawn_task(Box::new(limit), ctx.clone());
    let (batches, res) = tokio::time::timeout(Duration::from_secs(2), drain(handle))
        .await
        .expect("limit terminates");
    res.expect("limit ok");
    assert_eq!(ints(&batches, 0), vec![0, 1, 2, 3, 4]);
    assert!(ctx.failure().is_none());
}

/// Scan that yields one batch and then never produces again.
fn idle_scan(vals: Vec<i64>) -> BoxedTask {
    let batches = futures::stream::iter(vec![Ok::<_, FedqError>(int_batch(vals))])
        .chain(futures::stream::pending())
        .boxed();
    let stream = Box::pin(StreamAdapter::new(int_schema(), batches));
    Box::new(SourceTask::new("idle", "idle/test", stream))
}

async fn run_with_deadline(task: BoxedTask, ctx: SharedTaskContext) -> Vec<RecordBatch> {
    let (batches, res) = tokio::time::timeout(Duration::from_secs(2), drain(spawn_task(task, ctx)))
        .await
        .expect("query finishes while its scan is idle");
    res.expect("stopping early is not a failure");
    batches
}

#[tokio::test]
async fn limit_detaches_from_an_idle_scan() {
    let ctx = ctx();
    let limit = LimitTask::new(idle_scan(vec![1, 2, 3]), 2);
    let batches = run_with_deadline(Box::new(limit), ctx.clone()).await;
    assert_eq!(ints(&batches, 0), vec![1, 2]);
    assert!(!ctx.is_cancelled());
}

#[tokio::test]
async fn limit_detaches_through_operators_and_composites() {
    let filtered = FilterTask::try_new(
        idle_scan(vec![1, 2]),
        &int_schema(),
        &Expr::col("v").gt(Expr::lit(0_i64)),
    )
    .expect("filter");
    let limit = LimitTask::new(Box::new(filtered), 1);
    assert_eq!(ints(&run_with_deadline(Box::new(limit), ctx()).await, 0), vec![1]);

    let fan_out = ParallelTask::new("fan_out", vec![idle_scan(vec![5]), idle_scan(vec![5])]);
    let limit = LimitTask::new(Box::new(fan_out), 1);
    assert_eq!(ints(&run_with_deadline(Box::new(limit), ctx()).await, 0), vec![5]);

    let union = SequentialTask::new(
        "union_all",
        vec![idle_scan(vec![7, 8]), static_ints("tail", vec![vec![9]])],
    );
    let limit = LimitTask::new(Box::new(union), 2);
    assert_eq!(ints(&run_with_deadline(Box::new(limit), ctx()).await, 0), vec![7, 8]);
}

#[tokio::test]
async fn close_without_run_releases_input_once() {
    let usage = Usage::default();
    let mut filter = FilterTask::try_new(
        TrackedTask::boxed(&usage),
        &int_schema(),
        &Expr::col("v").gt(Expr::lit(1_i64)),
    )
    .expect("filter");
    filter.close().expect("close");
    filter.close().expect("close again");
    assert_eq!(usage.releases.load(Ordering::SeqCst), 1);
}

fn people() -> (SchemaRef, BoxedTask) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]));
    let batches = vec![
        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["ann", "bob", "cy"])),
            ],
        )
        .expect("batch"),
        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![4, 5])),
                Arc::new(StringArray::from(vec!["dee", "eve"])),
            ],
        )
        .expect("batch"),
    ];
    (schema, Box::new(StaticTask::new("people", batches)))
}

#[tokio::test]
async fn filter_then_project_keeps_scan_order() {
    let ctx = ctx();
    let (schema, scan) = people();
    let filter = FilterTask::try_new(scan, &schema, &Expr::col("id").gt(Expr::lit(1_i64)))
        .expect("filter");
    let project = ProjectionTask::try_new(
        Box::new(filter),
        &schema,
        &[
            (Expr::col("name"), "name".to_string()),
            (
                Expr::binary(Expr::col("id"), BinaryOp::Multiply, Expr::lit(10_i64)),
                "x".to_string(),
            ),
        ],
    )
    .expect("projection");
    assert_eq!(project.schema().field(1).name(), "x");

    let (batches, res) = drain(spawn_task(Box::new(project), ctx)).await;
    res.expect("pipeline ok");
    assert_eq!(ints(&batches, 1), vec![20, 30, 40, 50]);
    let names = batches
        .iter()
        .flat_map(|b| {
            let col = b.column(0).as_any().downcast_ref::<StringArray>().expect("utf8");
            (0..col.len()).map(|i| col.value(i).to_string()).collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["bob", "cy", "dee", "eve"]);
}

#[tokio::test]
async fn projection_coerces_to_a_wider_schema() {
    let ctx = ctx();
    let target = Arc::new(Schema::new(vec![
        Field::new("v", DataType::Int64, true),
        Field::new("missing", DataType::Int64, true),
    ]));
    let project = ProjectionTask::try_new(
        static_ints("ints", vec![vec![4, 5]]),
        &int_schema(),
        &[
            (Expr::col("v"), "v".to_string()),
            (Expr::lit(LiteralValue::Null), "missing".to_string()),
        ],
    )
    .expect("projection")
    .coerce_to(target.clone())
    .expect("coerce");
    assert_eq!(project.schema(), target);

    let (batches, res) = drain(spawn_task(Box::new(project), ctx)).await;
    res.expect("coerced ok");
    assert!(batches.iter().all(|b| b.schema() == target));
    assert_eq!(ints(&batches, 0), vec![4, 5]);
    assert_eq!(batches[0].column(1).null_count(), 2);

    let narrow = ProjectionTask::try_new(
        static_ints("ints", vec![vec![1]]),
        &int_schema(),
        &[(Expr::col("v"), "v".to_string())],
    )
    .expect("projection");
    assert!(matches!(narrow.coerce_to(target), Err(FedqError::Planning(_))));
}

#[tokio::test]
async fn hash_join_matches_keys_in_probe_order() {
    let ctx = ctx();
    let (people_schema, people_task) = people();
    let orders_schema = Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Int64, false),
        Field::new("amount", DataType::Int64, false),
    ]));
    let orders = RecordBatch::try_new(
        orders_schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![3, 1, 3, 9])),
            Arc::new(Int64Array::from(vec![30, 10, 31, 90])),
        ],
    )
    .expect("orders");
    let join = HashJoinTask::try_new(
        people_task,
        &people_schema,
        "p",
        "id",
        Box::new(StaticTask::new("orders", vec![orders])),
        &orders_schema,
        "o",
        "user_id",
    )
    .expect("join");
    let names = join
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["p.id", "p.name", "o.user_id", "o.amount"]);

    let (batches, res) = drain(spawn_task(Box::new(join), ctx)).await;
    res.expect("join ok");
    assert_eq!(ints(&batches, 0), vec![1, 3, 3]);
    assert_eq!(ints(&batches, 3), vec![10, 30, 31]);
}

#[tokio::test]
async fn aggregate_groups_in_first_seen_order() {
    let ctx = ctx();
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, false),
        Field::new("v", DataType::Int64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec!["b", "a", "b", "a", "b"])),
            Arc::new(Int64Array::from(vec![Some(1), Some(10), Some(3), None, Some(5)])),
        ],
    )
    .expect("batch");
    let spec = |func, arg: Option<&str>, name: &str| AggregateSpec {
        func,
        arg: arg.map(str::to_string),
        output_name: name.to_string(),
    };
    let agg = AggregateTask::try_new(
        Box::new(StaticTask::new("t", vec![batch])),
        &schema,
        &["k".to_string()],
        vec![
            spec(AggFunc::Count, None, "n"),
            spec(AggFunc::Count, Some("v"), "nv"),
            spec(AggFunc::Sum, Some("v"), "total"),
            spec(AggFunc::Avg, Some("v"), "mean"),
            spec(AggFunc::Max, Some("v"), "top"),
        ],
    )
    .expect("aggregate");

    let (batches, res) = drain(spawn_task(Box::new(agg), ctx)).await;
    res.expect("aggregate ok");
    assert_eq!(batches.len(), 1);
    let out = &batches[0];
    let keys = out.column(0).as_any().downcast_ref::<StringArray>().expect("keys");
    assert_eq!((keys.value(0), keys.value(1)), ("b", "a"));
    assert_eq!(ints(&batches, 1), vec![3, 2]);
    assert_eq!(ints(&batches, 2), vec![3, 1]);
    assert_eq!(ints(&batches, 3), vec![9, 10]);
    let mean = out.column(4).as_any().downcast_ref::<Float64Array>().expect("avg");
    assert_eq!(mean.value(0), 3.0);
    assert_eq!(mean.value(1), 10.0);
    assert_eq!(ints(&batches, 5), vec![5, 10]);
}

#[tokio::test]
async fn global_aggregate_over_empty_input_emits_one_row() {
    let ctx = ctx();
    let agg = AggregateTask::try_new(
        Box::new(StaticTask::new("empty", Vec::new())),
        &int_schema(),
        &[],
        vec![AggregateSpec {
            func: AggFunc::Count,
            arg: None,
            output_name: "n".to_string(),
        }],
    )
    .expect("aggregate");
    let (batches, res) = drain(spawn_task(Box::new(agg), ctx)).await;
    res.expect("aggregate ok");
    assert_eq!(ints(&batches, 0), vec![0]);
}

struct RecordingWriter {
    written: Arc<AtomicUsize>,
    fail: bool,
}

impl BatchWriter for RecordingWriter {
    fn backend(&self) -> &str {
        "recording"
    }

    fn write(&mut self, batch: RecordBatch) -> Result<u64> {
        if self.fail {
            return Err(FedqError::Unsupported("read-only".to_string()));
        }
        self.written.fetch_add(batch.num_rows(), Ordering::SeqCst);
        Ok(batch.num_rows() as u64)
    }

    fn finish(&mut self) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn mutate_reports_rows_affected() {
    let ctx = ctx();
    let written = Arc::new(AtomicUsize::new(0));
    let task = MutateTask::new(
        "insert(t)",
        Some(static_ints("values", vec![vec![1, 2], vec![3]])),
        Box::new(RecordingWriter {
            written: written.clone(),
            fail: false,
        }),
    );
    let (batches, res) = drain(spawn_task(Box::new(task), ctx)).await;
    res.expect("mutate ok");
    let affected = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .expect("u64");
    assert_eq!(affected.value(0), 3);
    assert_eq!(written.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn mutate_failure_names_task_and_backend() {
    let ctx = ctx();
    let task = MutateTask::new(
        "insert(t)",
        Some(static_ints("values", vec![vec![1]])),
        Box::new(RecordingWriter {
            written: Arc::new(AtomicUsize::new(0)),
            fail: true,
        }),
    );
    let (_, res) = drain(spawn_task(Box::new(task), ctx)).await;
    let err = res.expect_err("read-only backend");
    assert!(matches!(err, FedqError::Task { .. }));
    let msg = err.to_string();
    assert!(msg.contains("insert(t)") && msg.contains("recording"), "{msg}");
}

#[tokio::test]
async fn task_metrics_are_recorded() {
    let metrics = MetricsRegistry::new();
    let ctx = TaskContext::new(QueryId::next(), 4, 1024)
        .with_metrics(metrics.clone())
        .into_shared();
    let (_, res) = drain(spawn_task(static_ints("rows", vec![vec![1, 2, 3]]), ctx)).await;
    res.expect("ok");
    let text = metrics.render_prometheus();
    assert!(text.contains("fedq_task_rows_out_total"));
    assert!(text.contains("task=\"rows\""));
}
