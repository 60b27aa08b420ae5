//! The single SQLite handle a worker process owns for its whole lifetime.

use rusqlite::{Connection, OpenFlags};
use sqlite_bridge_wire::{QueryParams, Row, Value};

use crate::binding::{sql_to_value, value_to_sql};

pub struct Engine {
    conn: Option<Connection>,
}

pub struct ExecOutcome {
    pub insert_id: i64,
    pub changed: u64,
}

pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub insert_id: i64,
    pub changed: u64,
}

impl Engine {
    pub fn new() -> Self {
        Self { conn: None }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn open(&mut self, filename: &str, flags: Option<i64>) -> rusqlite::Result<()> {
        let conn = Connection::open_with_flags(filename, resolve_flags(flags))?;
        self.conn = Some(conn);
        Ok(())
    }

    pub fn close(&mut self) {
        // Dropping the handle runs sqlite3_close; there is nothing else to
        // release since the worker never holds more than this one handle.
        self.conn = None;
    }

    pub fn exec(&self, sql: &str) -> rusqlite::Result<ExecOutcome> {
        let conn = self.conn.as_ref().expect("caller checked is_open");
        let changed = conn.execute(sql, [])?;
        Ok(ExecOutcome {
            insert_id: conn.last_insert_rowid(),
            changed: changed as u64,
        })
    }

    pub fn query(&self, sql: &str, params: &QueryParams) -> rusqlite::Result<QueryOutcome> {
        let conn = self.conn.as_ref().expect("caller checked is_open");
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut rows_out = Vec::new();
        {
            let mut rows = match params {
                QueryParams::None => stmt.query([])?,
                QueryParams::Positional(values) => {
                    let bound: Vec<rusqlite::types::Value> =
                        values.iter().map(value_to_sql).collect();
                    stmt.query(rusqlite::params_from_iter(bound))?
                }
                QueryParams::Named(pairs) => {
                    let bound: Vec<(String, rusqlite::types::Value)> = pairs
                        .iter()
                        .map(|(name, value)| (name.clone(), value_to_sql(value)))
                        .collect();
                    let refs: Vec<(&str, &dyn rusqlite::ToSql)> = bound
                        .iter()
                        .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                        .collect();
                    stmt.query(refs.as_slice())?
                }
            };

            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    let value: rusqlite::types::Value = row.get(idx)?;
                    cells.push((name.clone(), sql_to_value(value)));
                }
                rows_out.push(Row(cells));
            }
        }
        // Finalized when `stmt` drops at the end of this scope.

        Ok(QueryOutcome {
            columns,
            rows: rows_out,
            insert_id: conn.last_insert_rowid(),
            changed: conn.changes(),
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_flags(flags: Option<i64>) -> OpenFlags {
    const READ_ONLY: i64 = 0x01;
    const READ_WRITE: i64 = 0x02;
    const CREATE: i64 = 0x04;

    let Some(bits) = flags else {
        return OpenFlags::default();
    };

    let mut out = OpenFlags::empty();
    if bits & READ_ONLY != 0 {
        out |= OpenFlags::SQLITE_OPEN_READ_ONLY;
    }
    if bits & READ_WRITE != 0 {
        out |= OpenFlags::SQLITE_OPEN_READ_WRITE;
    }
    if bits & CREATE != 0 {
        out |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    if out.is_empty() {
        return OpenFlags::default();
    }
    out | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlite_bridge_wire::Value;

    #[test]
    fn open_memory_and_query_literal() {
        let mut engine = Engine::new();
        engine.open(":memory:", None).unwrap();
        let out = engine.query("SELECT 1 AS value", &QueryParams::None).unwrap();
        assert_eq!(out.columns, vec!["value"]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].get("value"), Some(&Value::Integer(1)));
    }

    #[test]
    fn insert_id_matches_autoincrement() {
        let mut engine = Engine::new();
        engine.open(":memory:", None).unwrap();
        engine
            .exec("CREATE TABLE foo(id INTEGER PRIMARY KEY AUTOINCREMENT, bar TEXT)")
            .unwrap();
        let out = engine
            .query(
                "INSERT INTO foo(bar) VALUES(?1)",
                &QueryParams::Positional(vec![Value::Text("test".into())]),
            )
            .unwrap();
        assert_eq!(out.insert_id, 1);
        assert_eq!(out.changed, 1);
    }

    #[test]
    fn named_parameters_bind_by_name() {
        let mut engine = Engine::new();
        engine.open(":memory:", None).unwrap();
        let out = engine
            .query(
                "SELECT :a AS a, :b AS b",
                &QueryParams::Named(vec![
                    (":a".into(), Value::Integer(1)),
                    (":b".into(), Value::Text("x".into())),
                ]),
            )
            .unwrap();
        assert_eq!(out.rows[0].get("a"), Some(&Value::Integer(1)));
        assert_eq!(out.rows[0].get("b"), Some(&Value::Text("x".into())));
    }

    #[test]
    fn blob_round_trips_through_the_engine() {
        let mut engine = Engine::new();
        engine.open(":memory:", None).unwrap();
        let bytes = vec![0x00, 0x01, 0x02];
        let out = engine
            .query(
                "SELECT ?1 AS v",
                &QueryParams::Positional(vec![Value::Blob(bytes.clone())]),
            )
            .unwrap();
        assert_eq!(out.rows[0].get("v"), Some(&Value::Blob(bytes)));
    }
}
