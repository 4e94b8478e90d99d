use std::time::Duration;

use fedq_client::Session;
use fedq_sql::{Expr, SelectItem, SelectStmt, Statement, TableRef};
use futures::StreamExt;
use serde_json::json;

mod support;

use support::{create, engine, int_column};

async fn scripted_session(mode: &str) -> Session {
    let engine = engine();
    let mut session = engine.session();
    session
        .query(&create(
            "events_src",
            json!({"type": "scripted", "settings": {"mode": mode}}),
        ))
        .await
        .expect("create scripted source");
    session
}

fn events() -> Statement {
    Statement::Select(SelectStmt::star(TableRef::in_schema("events_src", "events")))
}

#[tokio::test]
async fn backend_failure_is_not_reported_as_success() {
    let mut session = scripted_session("fail").await;
    let err = session.query(&events()).await.expect_err("scan fails");
    assert!(err.to_string().contains("disk on fire"), "{err}");
}

#[tokio::test]
async fn failure_below_operators_reaches_the_consumer() {
    let mut session = scripted_session("fail").await;
    let sel = SelectStmt {
        columns: vec![SelectItem::column("n")],
        from: Some(TableRef::in_schema("events_src", "events")),
        selection: Some(Expr::col("n").gt(Expr::lit(0_i64))),
        ..Default::default()
    };
    let mut result = session
        .execute(&Statement::Select(sel))
        .await
        .expect("compiles and starts");
    let mut outcome = Ok(());
    loop {
        match result.next().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    let err = outcome.expect_err("failure surfaces through next");
    assert!(err.to_string().contains("disk on fire"), "{err}");
    assert!(result.next().await.expect("after failure").is_none());
}

#[tokio::test]
async fn explicit_cancel_ends_an_endless_query_cleanly() {
    let mut session = scripted_session("endless").await;
    let mut result = session.execute(&events()).await.expect("start");
    let first = result.next().await.expect("first batch").expect("some rows");
    assert_eq!(int_column(&[first], 0), vec![1, 2, 3, 4]);

    result.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(_batch) = result.next().await.expect("cancel is not an error") {}
    })
    .await
    .expect("cancel reaches the scan");
}

#[tokio::test]
async fn close_waits_for_every_task() {
    let mut session = scripted_session("endless").await;
    let sel = SelectStmt {
        columns: vec![SelectItem::column("n")],
        from: Some(TableRef::in_schema("events_src", "events")),
        limit: Some(1_000_000_000),
        ..Default::default()
    };
    let mut result = session.execute(&Statement::Select(sel)).await.expect("start");
    assert!(result.next().await.expect("batch").is_some());
    tokio::time::timeout(Duration::from_secs(5), result.close())
        .await
        .expect("close does not hang")
        .expect("close is clean");
}

#[tokio::test]
async fn limit_stops_an_endless_scan() {
    let mut session = scripted_session("endless").await;
    let sel = SelectStmt {
        columns: vec![SelectItem::Wildcard],
        from: Some(TableRef::in_schema("events_src", "events")),
        limit: Some(6),
        ..Default::default()
    };
    let query = Statement::Select(sel);
    let batches = tokio::time::timeout(Duration::from_secs(5), session.query(&query))
        .await
        .expect("limit terminates")
        .expect("query");
    assert_eq!(int_column(&batches, 0), vec![1, 2, 3, 4, 1, 2]);
}

#[tokio::test]
async fn dropping_the_result_cancels_the_query() {
    let mut session = scripted_session("endless").await;
    let mut result = session.execute(&events()).await.expect("start");
    assert!(result.next().await.expect("batch").is_some());
    drop(result);

    // The engine stays usable after an abandoned query.
    let mut session = scripted_session("fail").await;
    assert!(session.query(&events()).await.is_err());
}

#[tokio::test]
async fn result_adapts_to_a_record_batch_stream() {
    let mut session = scripted_session("fail").await;
    let result = session.execute(&events()).await.expect("start");
    let items = result.into_stream().collect::<Vec<_>>().await;
    assert!(items.last().expect("at least one item").is_err());
}
