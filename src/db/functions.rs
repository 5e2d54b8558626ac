//! User-defined SQL functions and the Unicode collation registered on
//! connections at open time.

use std::sync::Arc;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::ontology::Ontology;
use crate::text::codec;

fn fold(s: &str) -> String {
    s.chars().flat_map(|c| c.to_lowercase()).collect()
}

/// Case-and-locale-insensitive ordering used for name sorting.
pub fn register_collation(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_collation("UNICASE", |a, b| fold(a).cmp(&fold(b)))
}

fn value_as_epoch(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(r) => Some(r as i64),
        ValueRef::Text(t) => String::from_utf8_lossy(t).trim().parse().ok(),
        _ => None,
    }
}

/// `FormatDate(epoch) -> ISO8601`, `REGEXP(pattern, text) -> {0|1}`, and the
/// ontology lookups `GetServiceName(id)` / `GetServiceTypeID(name)`.
pub fn register_scalar_functions(
    conn: &Connection,
    ontology: Option<Arc<Ontology>>,
) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "FormatDate",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let formatted = value_as_epoch(ctx.get_raw(0))
                .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string());
            Ok(formatted)
        },
    )?;

    conn.create_scalar_function(
        "REGEXP",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern = ctx.get::<String>(0)?;
            let text = ctx.get::<String>(1)?;
            let re = regex::Regex::new(&pattern).map_err(|e| {
                rusqlite::Error::UserFunctionError(Box::new(std::io::Error::other(format!(
                    "bad regular expression: {e}"
                ))))
            })?;
            Ok(i64::from(re.is_match(&text)))
        },
    )?;

    if let Some(ontology) = ontology {
        let by_id = Arc::clone(&ontology);
        conn.create_scalar_function(
            "GetServiceName",
            1,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let id = ctx.get::<i64>(0)?;
                Ok(by_id.service_name_by_id(id as i32))
            },
        )?;

        conn.create_scalar_function(
            "GetServiceTypeID",
            1,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let name = ctx.get::<String>(0)?;
                Ok(ontology.service_id_by_name(&name).unwrap_or(-1) as i64)
            },
        )?;
    }

    Ok(())
}

/// `uncompress(blob) -> text`, the inverse of the text-pipeline codec.
pub fn register_uncompress(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "uncompress",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| match ctx.get_raw(0) {
            ValueRef::Blob(blob) => match codec::decompress(blob) {
                Ok(text) => Ok(Some(text)),
                Err(e) => {
                    tracing::warn!("uncompress failed: {e}");
                    Ok(None)
                }
            },
            _ => Ok(None),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_collation(&conn).unwrap();
        register_scalar_functions(&conn, Some(Arc::new(Ontology::with_defaults()))).unwrap();
        register_uncompress(&conn).unwrap();
        conn
    }

    #[test]
    fn format_date_is_iso8601() {
        let c = conn();
        let s: String = c
            .query_row("SELECT FormatDate(0)", [], |r| r.get(0))
            .unwrap();
        assert_eq!(s, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn regexp_matches() {
        let c = conn();
        let hit: i64 = c
            .query_row("SELECT REGEXP('^ab+c$', 'abbbc')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hit, 1);
        let miss: i64 = c
            .query_row("SELECT REGEXP('^ab+c$', 'xyz')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(miss, 0);
    }

    #[test]
    fn service_lookups_agree() {
        let c = conn();
        let id: i64 = c
            .query_row("SELECT GetServiceTypeID('Files')", [], |r| r.get(0))
            .unwrap();
        let name: String = c
            .query_row("SELECT GetServiceName(?1)", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Files");
        let missing: i64 = c
            .query_row("SELECT GetServiceTypeID('NoSuch')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(missing, -1);
    }

    #[test]
    fn uncompress_inverts_codec() {
        let c = conn();
        let compressed = codec::compress_text("hello compressed world").unwrap();
        let out: String = c
            .query_row("SELECT uncompress(?1)", [compressed], |r| r.get(0))
            .unwrap();
        assert_eq!(out, "hello compressed world");
    }

    #[test]
    fn unicase_collation_sorts_case_insensitively() {
        let c = conn();
        c.execute_batch("CREATE TABLE t (n TEXT COLLATE UNICASE); INSERT INTO t VALUES ('b'), ('A'), ('C');")
            .unwrap();
        let names: Vec<String> = c
            .prepare("SELECT n FROM t ORDER BY n")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(names, vec!["A", "b", "C"]);
    }
}
