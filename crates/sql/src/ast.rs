//! Resolved statement AST handed to the engine by an external parser.
//!
//! The engine never parses text. Parsers build these types directly, or ship
//! them as JSON (every node derives `serde`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::{Expr, LiteralValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Upsert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Create(CreateStmt),
    Alter(AlterStmt),
    Show(ShowStmt),
    Describe(DescribeStmt),
    Command(CommandStmt),
}

impl Statement {
    /// Statement keyword, used in logs and error messages.
    pub fn keyword(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert(_) => "INSERT",
            Statement::Upsert(_) => "UPSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Create(_) => "CREATE",
            Statement::Alter(_) => "ALTER",
            Statement::Show(_) => "SHOW",
            Statement::Describe(_) => "DESCRIBE",
            Statement::Command(_) => "COMMAND",
        }
    }

    /// `CREATE SOURCE <name> WITH <with>`.
    pub fn create_source(name: impl Into<String>, with: Value) -> Self {
        Statement::Create(CreateStmt {
            kind: CreateKind::Source,
            identity: name.into(),
            with,
        })
    }

    /// `DESCRIBE <identity>`.
    pub fn describe(identity: impl Into<String>) -> Self {
        Statement::Describe(DescribeStmt {
            identity: identity.into(),
            full: false,
        })
    }
}

/// Table reference, optionally schema-qualified and aliased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            alias: None,
        }
    }

    pub fn in_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name used to qualify this table's columns.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
    /// `func(column)`; `arg = None` means `COUNT(*)`.
    Aggregate {
        func: AggFunc,
        arg: Option<String>,
        alias: Option<String>,
    },
}

impl SelectItem {
    pub fn column(name: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr: Expr::Column(name.into()),
            alias: None,
        }
    }
}

/// Inner equi-join: `JOIN table ON left_key = right_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: TableRef,
    pub left_key: String,
    pub right_key: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectStmt {
    pub columns: Vec<SelectItem>,
    #[serde(default)]
    pub from: Option<TableRef>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    #[serde(default)]
    pub selection: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Operands appended with `UNION ALL`, in order.
    #[serde(default)]
    pub union_all: Vec<SelectStmt>,
}

impl SelectStmt {
    /// `SELECT * FROM <table>`.
    pub fn star(table: TableRef) -> Self {
        Self {
            columns: vec![SelectItem::Wildcard],
            from: Some(table),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsertSource {
    Values(Vec<Vec<LiteralValue>>),
    Select(Box<SelectStmt>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStmt {
    pub table: TableRef,
    /// Target columns; empty means all columns in table order.
    #[serde(default)]
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStmt {
    pub table: TableRef,
    pub assignments: Vec<(String, LiteralValue)>,
    #[serde(default)]
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStmt {
    pub table: TableRef,
    #[serde(default)]
    pub selection: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CreateKind {
    Source,
    Table,
    View,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStmt {
    pub kind: CreateKind,
    pub identity: String,
    /// Raw `WITH {...}` clause.
    #[serde(default)]
    pub with: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterStmt {
    pub identity: String,
    #[serde(default)]
    pub raw: String,
}

/// `SHOW ...` as produced by the parser.
///
/// Targets are kept as text so that unknown introspection kinds reach the
/// compiler and are rejected there.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShowStmt {
    /// `tables`, `columns`, `databases`, `variables`, ...
    #[serde(default)]
    pub show_type: Option<String>,
    /// Object named after SHOW (`SHOW <identity>`) or the table for `COLUMNS FROM`.
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub full: bool,
    /// `SHOW CREATE <what>`.
    #[serde(default)]
    pub create_what: Option<String>,
    /// `SESSION` / `GLOBAL` scope keyword.
    #[serde(default)]
    pub scope: Option<String>,
    /// `LIKE '<pattern>'`.
    #[serde(default)]
    pub like: Option<String>,
}

impl ShowStmt {
    pub fn of(show_type: &str) -> Self {
        Self {
            show_type: Some(show_type.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeStmt {
    pub identity: String,
    #[serde(default)]
    pub full: bool,
}

/// Session commands: `SET a = 1, b = 'x'`, `USE schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStmt {
    pub keyword: String,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub assignments: Vec<(String, LiteralValue)>,
}
