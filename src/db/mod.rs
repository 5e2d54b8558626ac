//! Storage layer: one handle per SQLite database file, a shared procedure
//! table, user functions, schema bootstrap, and the manager that owns the
//! canonical database set.

pub mod functions;
pub mod interface;
pub mod manager;
pub mod procedures;
pub mod schema;

pub use interface::{DbInterface, TuningProfile};
pub use manager::{Database, DbManager};

use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;

/// A typed column value as transferred out of the engine. NULL columns
/// transfer as `Null` rather than being coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Real(f64),
    Blob(Vec<u8>),
    Null,
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// A typed statement parameter. Replaces the varargs binding of older
/// designs with an explicit parameter list.
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
    Real(f64),
    Blob(Vec<u8>),
    Null,
}

impl Param {
    pub fn text(s: impl Into<String>) -> Self {
        Param::Text(s.into())
    }
}

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Param::Text(s) => s.to_sql(),
            Param::Int(i) => i.to_sql(),
            Param::Real(r) => r.to_sql(),
            Param::Blob(b) => b.to_sql(),
            Param::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
        }
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<i32> for Param {
    fn from(i: i32) -> Self {
        Param::Int(i as i64)
    }
}

impl From<u32> for Param {
    fn from(i: u32) -> Self {
        Param::Int(i as i64)
    }
}

/// A fully materialised result set with a rewindable cursor.
#[derive(Debug, Default)]
pub struct ResultSet {
    columns: usize,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl ResultSet {
    pub fn new(columns: usize, rows: Vec<Vec<Value>>) -> Self {
        ResultSet {
            columns,
            rows,
            cursor: 0,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Advance the cursor; returns false once past the last row. The cursor
    /// starts on the first row.
    pub fn iter_next(&mut self) -> bool {
        if self.cursor + 1 < self.rows.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Column of the current row.
    pub fn get(&self, col: usize) -> &Value {
        &self.rows[self.cursor][col]
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// First column of the first row as an integer, if present.
    pub fn first_int(&self) -> Option<i64> {
        self.rows.first().and_then(|r| r.first()).and_then(|v| match v {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        })
    }

    pub fn first_text(&self) -> Option<String> {
        self.rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_text())
            .map(str::to_string)
    }

    /// First column of every row as an integer.
    pub fn column_ints(&self, col: usize) -> Vec<i64> {
        self.rows
            .iter()
            .filter_map(|r| r.get(col).and_then(Value::as_int))
            .collect()
    }
}
