use arrow::array::{Array, Int64Array};
use fedq_client::Session;
use fedq_sql::{
    AggFunc, CommandStmt, DeleteStmt, Expr, InsertSource, InsertStmt, JoinClause, LiteralValue,
    SelectItem, SelectStmt, ShowStmt, Statement, TableRef, UpdateStmt,
};

mod support;

use support::{
    create, engine, float_column, int_column, rows_affected, shop_source, str_column,
};

async fn shop_session() -> Session {
    let engine = engine();
    let mut session = engine.session();
    session
        .query(&create("shop", shop_source(None)))
        .await
        .expect("create shop");
    session
        .query(&Statement::Command(CommandStmt {
            keyword: "USE".to_string(),
            identity: Some("shop".to_string()),
            assignments: Vec::new(),
        }))
        .await
        .expect("use shop");
    session
}

fn select(columns: Vec<SelectItem>, table: &str) -> SelectStmt {
    SelectStmt {
        columns,
        from: Some(TableRef::new(table)),
        ..Default::default()
    }
}

#[tokio::test]
async fn filter_projection_and_limit() {
    let mut session = shop_session().await;
    let mut sel = select(
        vec![
            SelectItem::column("name"),
            SelectItem::Expr {
                expr: Expr::col("age"),
                alias: Some("years".to_string()),
            },
        ],
        "users",
    );
    sel.selection = Some(Expr::col("age").gt(Expr::lit(30_i64)));
    let result = session.execute(&Statement::Select(sel.clone())).await.expect("execute");
    let names = result
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["name".to_string(), "years".to_string()]);

    let batches = result.collect().await.expect("collect");
    assert_eq!(str_column(&batches, 0), vec!["ann".to_string(), "cy".to_string()]);
    assert_eq!(int_column(&batches, 1), vec![31, 42]);

    sel.limit = Some(1);
    let batches = session.query(&Statement::Select(sel)).await.expect("limit");
    assert_eq!(str_column(&batches, 0), vec!["ann".to_string()]);
}

#[tokio::test]
async fn predicate_matching_nothing_is_an_empty_success() {
    let mut session = shop_session().await;
    let mut sel = SelectStmt::star(TableRef::new("users"));
    sel.selection = Some(Expr::col("age").gt(Expr::lit(100_i64)));
    let batches = session.query(&Statement::Select(sel)).await.expect("empty result");
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
}

#[tokio::test]
async fn join_with_group_by() {
    let mut session = shop_session().await;
    let sel = SelectStmt {
        columns: vec![
            SelectItem::column("u.name"),
            SelectItem::Aggregate {
                func: AggFunc::Sum,
                arg: Some("o.total".to_string()),
                alias: Some("spent".to_string()),
            },
            SelectItem::Aggregate {
                func: AggFunc::Count,
                arg: None,
                alias: Some("n".to_string()),
            },
        ],
        from: Some(TableRef::new("users").with_alias("u")),
        joins: vec![JoinClause {
            table: TableRef::new("orders").with_alias("o"),
            left_key: "u.id".to_string(),
            right_key: "o.user_id".to_string(),
        }],
        group_by: vec!["u.name".to_string()],
        ..Default::default()
    };
    let batches = session.query(&Statement::Select(sel)).await.expect("join + group");
    let names = str_column(&batches, 0);
    let spent = float_column(&batches, 1);
    let counts = int_column(&batches, 2);
    let mut rows = names
        .into_iter()
        .zip(spent)
        .zip(counts)
        .map(|((name, spent), n)| (name, spent, n))
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        rows,
        vec![("ann".to_string(), 10.0, 2), ("bob".to_string(), 20.0, 1)]
    );
}

#[tokio::test]
async fn union_all_keeps_operand_order() {
    let mut session = shop_session().await;
    let mut first = select(vec![SelectItem::column("id")], "users");
    first.union_all = vec![select(
        vec![SelectItem::Expr {
            expr: Expr::col("order_id"),
            alias: None,
        }],
        "orders",
    )];
    let batches = session.query(&Statement::Select(first)).await.expect("union all");
    assert_eq!(int_column(&batches, 0), vec![1, 2, 3, 10, 11, 12]);
}

#[tokio::test]
async fn union_all_with_null_literal_matches_declared_schema() {
    let mut session = shop_session().await;
    let mut first = select(vec![SelectItem::column("id")], "users");
    first.union_all = vec![SelectStmt {
        columns: vec![SelectItem::Expr {
            expr: Expr::lit(LiteralValue::Null),
            alias: None,
        }],
        ..Default::default()
    }];
    let result = session.execute(&Statement::Select(first)).await.expect("execute");
    let schema = result.schema();
    assert!(schema.field(0).is_nullable());
    let batches = result.collect().await.expect("union all");
    assert!(batches.iter().all(|b| b.schema() == schema));
    let ids = batches
        .iter()
        .flat_map(|b| {
            let col = b
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64 column")
                .clone();
            (0..col.len())
                .map(|i| (!col.is_null(i)).then(|| col.value(i)))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3), None]);
}

#[tokio::test]
async fn table_in_parent_and_child_reads_both() {
    let engine = engine();
    let mut session = engine.session();
    for stmt in [
        create("shop", shop_source(None)),
        create("shop_eu", shop_source(Some("shop"))),
    ] {
        session.query(&stmt).await.expect("create");
    }
    session
        .query(&Statement::Command(CommandStmt {
            keyword: "use".to_string(),
            identity: Some("shop".to_string()),
            assignments: Vec::new(),
        }))
        .await
        .expect("use");
    let batches = session
        .query(&Statement::Select(select(vec![SelectItem::column("id")], "users")))
        .await
        .expect("fan-out");
    let mut ids = int_column(&batches, 0);
    ids.sort();
    assert_eq!(ids, vec![1, 1, 2, 2, 3, 3]);

    let explain = session
        .explain(&Statement::Select(SelectStmt::star(TableRef::new("users"))))
        .expect("explain");
    assert!(explain.contains("FanOut table=users partitions=2"), "{explain}");
}

#[tokio::test]
async fn select_without_from_returns_one_row() {
    let mut session = shop_session().await;
    let sel = SelectStmt {
        columns: vec![SelectItem::Expr {
            expr: Expr::lit(7_i64),
            alias: Some("seven".to_string()),
        }],
        ..Default::default()
    };
    let batches = session.query(&Statement::Select(sel)).await.expect("constant select");
    assert_eq!(int_column(&batches, 0), vec![7]);
}

#[tokio::test]
async fn insert_update_delete_and_upsert_reach_the_backend() {
    let mut session = shop_session().await;
    let insert = InsertStmt {
        table: TableRef::new("users"),
        columns: vec!["id".to_string(), "name".to_string()],
        source: InsertSource::Values(vec![
            vec![LiteralValue::Int64(4), "dee".into()],
            vec![LiteralValue::Int64(5), "eve".into()],
        ]),
    };
    let out = session.query(&Statement::Insert(insert)).await.expect("insert");
    assert_eq!(rows_affected(&out), 2);

    let update = UpdateStmt {
        table: TableRef::new("users"),
        assignments: vec![("age".to_string(), LiteralValue::Int64(26))],
        selection: Some(Expr::col("name").equals(Expr::lit("bob"))),
    };
    let out = session.query(&Statement::Update(update)).await.expect("update");
    assert_eq!(rows_affected(&out), 1);

    let delete = DeleteStmt {
        table: TableRef::new("users"),
        selection: Some(Expr::col("age").gt(Expr::lit(30_i64))),
    };
    let out = session.query(&Statement::Delete(delete)).await.expect("delete");
    assert_eq!(rows_affected(&out), 2);

    let upsert = InsertStmt {
        table: TableRef::new("users"),
        columns: vec!["id".to_string(), "name".to_string(), "age".to_string()],
        source: InsertSource::Values(vec![vec![
            LiteralValue::Int64(2),
            "robert".into(),
            LiteralValue::Int64(27),
        ]]),
    };
    let out = session.query(&Statement::Upsert(upsert)).await.expect("upsert");
    assert_eq!(rows_affected(&out), 1);

    let batches = session
        .query(&Statement::Select(select(
            vec![SelectItem::column("id"), SelectItem::column("name")],
            "users",
        )))
        .await
        .expect("select after writes");
    let mut rows = int_column(&batches, 0)
        .into_iter()
        .zip(str_column(&batches, 1))
        .collect::<Vec<_>>();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            (2, "robert".to_string()),
            (4, "dee".to_string()),
            (5, "eve".to_string()),
        ]
    );
}

#[tokio::test]
async fn insert_select_copies_rows() {
    let engine = engine();
    let mut session = engine.session();
    session
        .query(&create("shop", shop_source(None)))
        .await
        .expect("create shop");
    session
        .query(&create(
            "archive",
            serde_json::json!({"type": "memory", "settings": {"tables": {
                "names": {"columns": [{"name": "name", "type": "utf8"}]}
            }}}),
        ))
        .await
        .expect("create archive");

    let mut from_shop = select(vec![SelectItem::column("name")], "users");
    from_shop.from = Some(TableRef::in_schema("shop", "users"));
    let insert = InsertStmt {
        table: TableRef::in_schema("archive", "names"),
        columns: Vec::new(),
        source: InsertSource::Select(Box::new(from_shop)),
    };
    let out = session.query(&Statement::Insert(insert)).await.expect("insert select");
    assert_eq!(rows_affected(&out), 3);

    let batches = session
        .query(&Statement::Select(SelectStmt::star(TableRef::in_schema("archive", "names"))))
        .await
        .expect("read archive");
    assert_eq!(
        str_column(&batches, 0),
        vec!["ann".to_string(), "bob".to_string(), "cy".to_string()]
    );
}

#[tokio::test]
async fn show_and_set_run_through_the_session() {
    let mut session = shop_session().await;
    let tables = session
        .query(&Statement::Show(ShowStmt::of("tables")))
        .await
        .expect("show tables");
    assert_eq!(
        str_column(&tables, 0),
        vec!["orders".to_string(), "users".to_string()]
    );

    session
        .query(&Statement::Command(CommandStmt {
            keyword: "SET".to_string(),
            identity: None,
            assignments: vec![("sql_mode".to_string(), "strict".into())],
        }))
        .await
        .expect("set");
    assert_eq!(
        session.variable("SQL_MODE"),
        Some(&LiteralValue::Utf8("strict".to_string()))
    );
}

#[tokio::test]
async fn failed_statement_keeps_session_state() {
    let mut session = shop_session().await;
    let err = session
        .query(&Statement::Command(CommandStmt {
            keyword: "use".to_string(),
            identity: Some("ghost".to_string()),
            assignments: Vec::new(),
        }))
        .await
        .expect_err("unknown schema");
    assert!(err.to_string().contains("schema not found"), "{err}");
    assert_eq!(session.current_schema(), Some("shop"));
}

#[tokio::test]
async fn task_metrics_are_recorded() {
    let engine = support::engine();
    let mut session = engine.session();
    session
        .query(&create("shop", shop_source(None)))
        .await
        .expect("create");
    session
        .query(&Statement::Select(SelectStmt::star(TableRef::in_schema("shop", "users"))))
        .await
        .expect("select");
    let metrics = engine.prometheus_metrics();
    assert!(metrics.contains("scan(users)"), "{metrics}");
}
