//! Bulk upsert with per-row merge fallback.

use crate::backend::{
    quote_column_list, quote_ident, quote_ident_path, BackendError, DbConnection, DbTransaction,
    DbValue,
};
use crate::table::TableSpec;
use std::collections::HashSet;
use tracing::{debug, warn};

/// How a batch reached the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub bulk_inserted: u64,
    pub merged: u64,
}

impl UpsertReport {
    pub fn total(&self) -> u64 {
        self.bulk_inserted + self.merged
    }
}

/// Write `rows` into `table`, replacing rows whose primary key already exists.
///
/// The whole batch is first bulk inserted in one transaction. If that hits a
/// key conflict it is rolled back and retried in a second transaction that
/// bulk inserts the fresh rows and merges the conflicting ones one at a time.
/// `should_commit` is polled before each commit; returning false rolls back
/// and yields [`BackendError::Interrupted`].
pub fn upsert_rows(
    conn: &DbConnection,
    table: &TableSpec,
    rows: &[Vec<DbValue>],
    should_commit: Option<&dyn Fn() -> bool>,
) -> Result<UpsertReport, BackendError> {
    if rows.is_empty() {
        return Ok(UpsertReport::default());
    }
    let columns = table.column_names();
    let key_indices = table.key_indices()?;
    let target = table.qualified_name();

    let bulk = conn.transaction(|tx| {
        let inserted = tx.bulk_insert_rows(&target, &columns, rows)?;
        check_commit(should_commit)?;
        Ok(UpsertReport {
            bulk_inserted: inserted,
            merged: 0,
        })
    });

    match bulk {
        Ok(report) => {
            debug!(table = %target, rows = report.bulk_inserted, "Bulk insert complete");
            Ok(report)
        }
        Err(err) if err.is_constraint_violation() => {
            warn!(table = %target, "Duplicate found, attempting to update");
            let report = conn.transaction(|tx| {
                let report = merge_batch(tx, table, &columns, &key_indices, rows)?;
                check_commit(should_commit)?;
                Ok(report)
            })?;
            debug!(
                table = %target,
                bulk_inserted = report.bulk_inserted,
                merged = report.merged,
                "Rows merged"
            );
            Ok(report)
        }
        Err(err) => Err(err),
    }
}

fn check_commit(should_commit: Option<&dyn Fn() -> bool>) -> Result<(), BackendError> {
    match should_commit {
        Some(guard) if !guard() => Err(BackendError::Interrupted),
        _ => Ok(()),
    }
}

fn merge_batch(
    tx: &mut DbTransaction<'_>,
    table: &TableSpec,
    columns: &[&str],
    key_indices: &[usize],
    rows: &[Vec<DbValue>],
) -> Result<UpsertReport, BackendError> {
    let exists_sql = format!(
        "SELECT 1 FROM {} WHERE {} LIMIT 1",
        quote_ident_path(&table.qualified_name()),
        key_indices
            .iter()
            .map(|&i| format!("{} = ?", quote_ident(columns[i])))
            .collect::<Vec<_>>()
            .join(" AND ")
    );

    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
    let mut fresh = Vec::new();
    let mut conflicting = Vec::new();
    for row in rows {
        let key: Vec<DbValue> = key_indices.iter().map(|&i| row[i].clone()).collect();
        let key_text = format!("{:?}", key);
        let duplicate_in_batch = !seen.insert(key_text);
        if duplicate_in_batch || !tx.query_rows(&exists_sql, &key)?.is_empty() {
            conflicting.push(row);
        } else {
            fresh.push(row.clone());
        }
    }

    let bulk_inserted = tx.bulk_insert_rows(&table.qualified_name(), columns, &fresh)?;
    let merge_sql = merge_statement(table, columns, key_indices);
    for row in &conflicting {
        tx.execute(&merge_sql, row)?;
    }

    Ok(UpsertReport {
        bulk_inserted,
        merged: conflicting.len() as u64,
    })
}

fn merge_statement(table: &TableSpec, columns: &[&str], key_indices: &[usize]) -> String {
    let keys: Vec<&str> = key_indices.iter().map(|&i| columns[i]).collect();
    let updates: Vec<String> = columns
        .iter()
        .enumerate()
        .filter(|(i, _)| !key_indices.contains(i))
        .map(|(_, c)| format!("{col} = EXCLUDED.{col}", col = quote_ident(c)))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident_path(&table.qualified_name()),
        quote_column_list(columns),
        vec!["?"; columns.len()].join(", "),
        quote_column_list(&keys),
        action
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ensure_table, CreatePolicy};

    fn spec() -> TableSpec {
        TableSpec::new("main", "things")
            .column("id", "VARCHAR")
            .column("value", "DOUBLE")
            .primary_key(&["id"])
    }

    fn row(id: &str, value: f64) -> Vec<DbValue> {
        vec![DbValue::from(id), DbValue::from(value)]
    }

    #[test]
    fn merge_statement_updates_non_key_columns() {
        let spec = spec();
        let sql = merge_statement(&spec, &spec.column_names(), &[0]);
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO UPDATE SET \"value\" = EXCLUDED.\"value\""));
    }

    #[test]
    fn duplicates_within_batch_are_merged() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        ensure_table(&conn, &spec(), CreatePolicy::Allow, &mut |_| true).unwrap();

        let rows = vec![row("a", 1.0), row("b", 2.0), row("a", 3.0)];
        let report = upsert_rows(&conn, &spec(), &rows, None).unwrap();
        assert_eq!(report, UpsertReport { bulk_inserted: 2, merged: 1 });

        let value: f64 = conn
            .query_scalar("SELECT value FROM main.things WHERE id = 'a'", &[])
            .unwrap();
        assert_eq!(value, 3.0);
    }

    #[test]
    fn interrupted_commit_leaves_table_untouched() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        ensure_table(&conn, &spec(), CreatePolicy::Allow, &mut |_| true).unwrap();

        let stop = || false;
        let err = upsert_rows(&conn, &spec(), &[row("a", 1.0)], Some(&stop)).unwrap_err();
        assert!(matches!(err, BackendError::Interrupted));

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM main.things", &[]).unwrap();
        assert_eq!(count, 0);
    }
}
