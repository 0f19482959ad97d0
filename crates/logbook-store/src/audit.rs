//! Read side of the append-only approval log.

use crate::sqlite::{fmt_ts, parse_col, sql_err, SqliteStore};
use async_trait::async_trait;
use logbook_types::{AuditEntry, AuditListOptions, AuditLog, StoreError};
use rusqlite::{params, Row};

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        report_id: row.get(1)?,
        actor_id: row.get(2)?,
        action: parse_col(row, 3)?,
        comments: row.get(4)?,
        timestamp: parse_col(row, 5)?,
    })
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn timeline(&self, report_id: i64) -> Result<Vec<AuditEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, report_id, action_by, action, comments, timestamp
                     FROM approval_logs WHERE report_id = ?1
                     ORDER BY timestamp ASC, id ASC",
                )
                .map_err(sql_err)?;
            let rows = stmt.query_map([report_id], entry_from_row).map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEntry>, StoreError> {
        let since = opts.since.map(fmt_ts);
        let limit = i64::from(opts.limit.unwrap_or(100));
        let offset = i64::from(opts.offset.unwrap_or(0));
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, report_id, action_by, action, comments, timestamp
                     FROM approval_logs
                     WHERE (report_id = ?1 OR ?1 IS NULL)
                       AND (action_by = ?2 OR ?2 IS NULL)
                       AND (timestamp >= ?3 OR ?3 IS NULL)
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?4 OFFSET ?5",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map(
                    params![opts.report_id, opts.actor_id, since, limit, offset],
                    entry_from_row,
                )
                .map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }
}
