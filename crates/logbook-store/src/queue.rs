//! Delivery outbox rows.

use crate::sqlite::{fmt_ts, now, parse_col, parse_opt_col, sql_err, SqliteStore};
use async_trait::async_trait;
use logbook_types::{DeliveryJob, DeliveryStore, JobRequest, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};

const JOB_COLUMNS: &str = "id, report_id, recipient_id, kind, artifact_path, audit_id, status, \
     error_message, attempts, queued_at, sent_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryJob> {
    Ok(DeliveryJob {
        id: row.get(0)?,
        report_id: row.get(1)?,
        recipient_id: row.get(2)?,
        kind: parse_col(row, 3)?,
        artifact_path: row.get(4)?,
        audit_id: row.get(5)?,
        status: parse_col(row, 6)?,
        error_message: row.get(7)?,
        attempts: row.get(8)?,
        queued_at: parse_col(row, 9)?,
        sent_at: parse_opt_col(row, 10)?,
    })
}

fn load_job(conn: &Connection, job_id: i64) -> Result<Option<DeliveryJob>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM delivery_queue WHERE id = ?1");
    conn.query_row(&sql, [job_id], job_from_row)
        .optional()
        .map_err(sql_err)
}

#[async_trait]
impl DeliveryStore for SqliteStore {
    async fn enqueue(&self, req: &JobRequest) -> Result<(DeliveryJob, bool), StoreError> {
        self.with_tx(|tx| {
            // `IS` so that two NULL artifacts (or audit ids) compare equal.
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM delivery_queue
                 WHERE report_id = ?1 AND recipient_id = ?2 AND kind = ?3
                   AND artifact_path IS ?4 AND audit_id IS ?5
                 ORDER BY id LIMIT 1"
            );
            let existing = tx
                .query_row(
                    &sql,
                    params![
                        req.report_id,
                        req.recipient_id,
                        req.kind.as_str(),
                        req.artifact_path,
                        req.audit_id
                    ],
                    job_from_row,
                )
                .optional()
                .map_err(sql_err)?;
            if let Some(job) = existing {
                return Ok((job, false));
            }
            tx.execute(
                "INSERT INTO delivery_queue
                    (report_id, recipient_id, kind, artifact_path, audit_id, status, attempts, queued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6)",
                params![
                    req.report_id,
                    req.recipient_id,
                    req.kind.as_str(),
                    req.artifact_path,
                    req.audit_id,
                    fmt_ts(now())
                ],
            )
            .map_err(sql_err)?;
            let job = load_job(tx, tx.last_insert_rowid())?
                .ok_or_else(|| StoreError::Other("inserted job vanished".to_string()))?;
            Ok((job, true))
        })
    }

    async fn due_jobs(&self) -> Result<Vec<DeliveryJob>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM delivery_queue
                 WHERE status IN ('pending', 'error')
                 ORDER BY queued_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let rows = stmt.query_map([], job_from_row).map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }

    async fn mark_sent(&self, job_id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            // `sent` is terminal; a late duplicate result never reopens it.
            conn.execute(
                "UPDATE delivery_queue
                 SET status = 'sent', error_message = NULL, attempts = attempts + 1, sent_at = ?1
                 WHERE id = ?2 AND status != 'sent'",
                params![fmt_ts(now()), job_id],
            )
            .map_err(sql_err)?;
            Ok(())
        })
    }

    async fn mark_failed(&self, job_id: i64, error: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE delivery_queue
                 SET status = 'error', error_message = ?1, attempts = attempts + 1
                 WHERE id = ?2 AND status != 'sent'",
                params![error, job_id],
            )
            .map_err(sql_err)?;
            Ok(())
        })
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<DeliveryJob>, StoreError> {
        self.with_conn(|conn| load_job(conn, job_id))
    }

    async fn jobs_for_report(&self, report_id: i64) -> Result<Vec<DeliveryJob>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM delivery_queue WHERE report_id = ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let rows = stmt.query_map([report_id], job_from_row).map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }
}
