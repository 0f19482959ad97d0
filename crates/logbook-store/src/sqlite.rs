//! SQLite store: schema, connection handling, and the report side.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use logbook_types::{
    plan_transition, Action, AuditEntry, FieldMap, Notification, Report, ReportStatus,
    ReportStore, Role, StoreError, Template, TransitionError, TransitionOutcome,
    TransitionRequest, User,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    email TEXT NOT NULL,
    emp_code TEXT,
    designation TEXT
);

CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    uploaded_by TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reports (
    report_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK (status IN ('draft', 'submitted', 'endorsed', 'approved', 'needs_revision')),
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_modified_at TEXT NOT NULL,
    last_modified_by TEXT NOT NULL,
    artifact_path TEXT,
    template_id INTEGER REFERENCES templates(id),
    final_pdf_path TEXT
);

CREATE TABLE IF NOT EXISTS report_data (
    report_id INTEGER NOT NULL REFERENCES reports(report_id),
    field_name TEXT NOT NULL,
    field_value TEXT NOT NULL DEFAULT '',
    UNIQUE (report_id, field_name)
);

CREATE TABLE IF NOT EXISTS approval_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id INTEGER NOT NULL REFERENCES reports(report_id),
    action_by TEXT NOT NULL,
    action TEXT NOT NULL,
    comments TEXT,
    timestamp TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS approval_logs_no_update
BEFORE UPDATE ON approval_logs
BEGIN
    SELECT RAISE(ABORT, 'approval_logs is append-only');
END;

CREATE TRIGGER IF NOT EXISTS approval_logs_no_delete
BEFORE DELETE ON approval_logs
BEGIN
    SELECT RAISE(ABORT, 'approval_logs is append-only');
END;

CREATE TABLE IF NOT EXISTS delivery_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id INTEGER NOT NULL REFERENCES reports(report_id),
    recipient_id TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'final_report'
        CHECK (kind IN ('review_request', 'approval_request', 'revision_request', 'final_report')),
    artifact_path TEXT,
    audit_id INTEGER,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'sent', 'error')),
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL,
    sent_at TEXT
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    subject TEXT NOT NULL,
    message TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
CREATE INDEX IF NOT EXISTS idx_logs_report ON approval_logs(report_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_queue_status ON delivery_queue(status);
CREATE INDEX IF NOT EXISTS idx_queue_report ON delivery_queue(report_id, recipient_id, kind);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
"#;

pub(crate) const REPORT_COLUMNS: &str = "report_id, user_id, title, status, version, created_at, \
     last_modified_at, last_modified_by, artifact_path, template_id, final_pdf_path";

/// SQLite-backed store shared by the workflow, the API, and the delivery worker.
pub struct SqliteStore {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::init(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Another process (the remote-action endpoint) may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction; commits only when `f` succeeds.
    pub(crate) fn with_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(sql_err)?;
            let out = f(&tx)?;
            tx.commit().map_err(sql_err)?;
            Ok(out)
        })
    }
}

pub(crate) fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

/// Current time at the precision stored in the database.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text ordering equals time ordering.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a text column through `FromStr`, reporting bad values as conversion failures.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        report_id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        fields: FieldMap::new(),
        status: parse_col(row, 3)?,
        version: row.get(4)?,
        created_at: parse_col(row, 5)?,
        last_modified_at: parse_col(row, 6)?,
        last_modified_by: row.get(7)?,
        artifact_path: row.get(8)?,
        template_id: row.get(9)?,
        final_pdf_path: row.get(10)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        name: row.get(1)?,
        role: parse_col::<Role>(row, 2)?,
        email: row.get(3)?,
        emp_code: row.get(4)?,
        designation: row.get(5)?,
    })
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        file_path: row.get(2)?,
        uploaded_by: row.get(3)?,
        uploaded_at: parse_col(row, 4)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subject: row.get(2)?,
        message: row.get(3)?,
        is_read: row.get(4)?,
        created_at: parse_col(row, 5)?,
    })
}

/// Report row plus its field values.
pub(crate) fn load_report(conn: &Connection, report_id: i64) -> Result<Option<Report>, StoreError> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE report_id = ?1");
    let report = conn
        .query_row(&sql, [report_id], report_from_row)
        .optional()
        .map_err(sql_err)?;
    let Some(mut report) = report else {
        return Ok(None);
    };
    let mut stmt = conn
        .prepare("SELECT field_name, field_value FROM report_data WHERE report_id = ?1")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([report_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(sql_err)?;
    let mut fields = FieldMap::new();
    for row in rows {
        let (name, value) = row.map_err(sql_err)?;
        fields.insert(name, value);
    }
    report.fields = fields;
    Ok(Some(report))
}

fn require_report(conn: &Connection, report_id: i64) -> Result<Report, StoreError> {
    load_report(conn, report_id)?
        .ok_or_else(|| StoreError::NotFound(format!("report {}", report_id)))
}

fn load_user(conn: &Connection, user_id: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        "SELECT user_id, name, role, email, emp_code, designation FROM users WHERE user_id = ?1",
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(sql_err)
}

/// Next audit timestamp for a report: now, but never earlier than the latest entry.
fn next_audit_timestamp(conn: &Connection, report_id: i64) -> Result<DateTime<Utc>, StoreError> {
    let last: Option<String> = conn
        .query_row(
            "SELECT MAX(timestamp) FROM approval_logs WHERE report_id = ?1",
            [report_id],
            |row| row.get(0),
        )
        .map_err(sql_err)?;
    let now = now();
    let last = last
        .map(|s| s.parse::<DateTime<Utc>>())
        .transpose()
        .map_err(|e| StoreError::Other(format!("corrupt audit timestamp: {}", e)))?;
    Ok(match last {
        Some(last) if last > now => last,
        _ => now,
    })
}

/// Field edits and artifact uploads share the editability rule and version bump.
fn touch_editable(tx: &Connection, report_id: i64, actor_id: &str) -> Result<(), StoreError> {
    let report = require_report(tx, report_id)?;
    if !report.status.is_editable() {
        return Err(TransitionError::NotEditable(report_id, report.status).into());
    }
    tx.execute(
        "UPDATE reports SET version = version + 1, last_modified_at = ?1, last_modified_by = ?2
         WHERE report_id = ?3",
        params![fmt_ts(now()), actor_id, report_id],
    )
    .map_err(sql_err)?;
    Ok(())
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (user_id, name, role, email, emp_code, designation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    name = excluded.name, role = excluded.role, email = excluded.email,
                    emp_code = excluded.emp_code, designation = excluded.designation",
                params![
                    user.user_id,
                    user.name,
                    user.role.as_str(),
                    user.email,
                    user.emp_code,
                    user.designation,
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.with_conn(|conn| load_user(conn, user_id))
    }

    async fn get_users(&self, user_ids: &[String]) -> Result<HashMap<String, User>, StoreError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders: Vec<String> = user_ids.iter().map(|_| "?".to_string()).collect();
        let sql = format!(
            "SELECT user_id, name, role, email, emp_code, designation FROM users WHERE user_id IN ({})",
            placeholders.join(",")
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                user_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), user_from_row)
                .map_err(sql_err)?;
            let mut users = HashMap::new();
            for row in rows {
                let user = row.map_err(sql_err)?;
                users.insert(user.user_id.clone(), user);
            }
            Ok(users)
        })
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT user_id, name, role, email, emp_code, designation FROM users
                     WHERE role = ?1 ORDER BY user_id",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([role.as_str()], user_from_row)
                .map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }

    async fn add_template(
        &self,
        name: &str,
        file_path: &str,
        uploaded_by: &str,
    ) -> Result<Template, StoreError> {
        let uploaded_at = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO templates (name, file_path, uploaded_by, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, file_path, uploaded_by, fmt_ts(uploaded_at)],
            )
            .map_err(sql_err)?;
            Ok(Template {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                file_path: file_path.to_string(),
                uploaded_by: uploaded_by.to_string(),
                uploaded_at,
            })
        })
    }

    async fn get_template(&self, id: i64) -> Result<Option<Template>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, file_path, uploaded_by, uploaded_at FROM templates WHERE id = ?1",
                [id],
                template_from_row,
            )
            .optional()
            .map_err(sql_err)
        })
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, file_path, uploaded_by, uploaded_at FROM templates ORDER BY id")
                .map_err(sql_err)?;
            let rows = stmt.query_map([], template_from_row).map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }

    async fn create_report(
        &self,
        owner_id: &str,
        title: &str,
        template_id: Option<i64>,
    ) -> Result<Report, StoreError> {
        let ts = fmt_ts(now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (user_id, title, status, version, created_at, last_modified_at, last_modified_by, template_id)
                 VALUES (?1, ?2, 'draft', 1, ?3, ?3, ?1, ?4)",
                params![owner_id, title, ts, template_id],
            )
            .map_err(sql_err)?;
            require_report(conn, conn.last_insert_rowid())
        })
    }

    async fn get_report(&self, report_id: i64) -> Result<Option<Report>, StoreError> {
        self.with_conn(|conn| load_report(conn, report_id))
    }

    async fn list_reports_by_status(
        &self,
        status: ReportStatus,
        owner_id: Option<&str>,
    ) -> Result<Vec<Report>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT report_id FROM reports
                     WHERE status = ?1 AND (user_id = ?2 OR ?2 IS NULL)
                     ORDER BY created_at DESC, report_id DESC",
                )
                .map_err(sql_err)?;
            let ids = stmt
                .query_map(params![status.as_str(), owner_id], |row| row.get::<_, i64>(0))
                .map_err(sql_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            let mut reports = Vec::with_capacity(ids.len());
            for id in ids {
                reports.push(require_report(conn, id)?);
            }
            Ok(reports)
        })
    }

    async fn set_field(
        &self,
        report_id: i64,
        actor_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Report, StoreError> {
        self.with_tx(|tx| {
            touch_editable(tx, report_id, actor_id)?;
            tx.execute(
                "INSERT INTO report_data (report_id, field_name, field_value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(report_id, field_name) DO UPDATE SET field_value = excluded.field_value",
                params![report_id, name, value],
            )
            .map_err(sql_err)?;
            require_report(tx, report_id)
        })
    }

    async fn attach_artifact(
        &self,
        report_id: i64,
        actor_id: &str,
        path: &str,
    ) -> Result<Report, StoreError> {
        self.with_tx(|tx| {
            touch_editable(tx, report_id, actor_id)?;
            tx.execute(
                "UPDATE reports SET artifact_path = ?1 WHERE report_id = ?2",
                params![path, report_id],
            )
            .map_err(sql_err)?;
            require_report(tx, report_id)
        })
    }

    async fn apply_transition(
        &self,
        req: &TransitionRequest,
    ) -> Result<TransitionOutcome, StoreError> {
        let outcome = self.with_tx(|tx| {
            let report = require_report(tx, req.report_id)?;
            let actor = load_user(tx, &req.actor_id)?
                .ok_or_else(|| StoreError::NotFound(format!("user {}", req.actor_id)))?;
            let next = plan_transition(&report, &actor, req.action, req.comments.as_deref())?;

            let comments = req
                .comments
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .or_else(|| match req.action {
                    Action::Submit => actor
                        .signature_identity()
                        .map(|(code, title)| format!("{} - {}", code, title)),
                    _ => None,
                });
            let timestamp = next_audit_timestamp(tx, req.report_id)?;
            let ts = fmt_ts(timestamp);

            tx.execute(
                "UPDATE reports SET status = ?1, version = version + 1,
                    last_modified_at = ?2, last_modified_by = ?3
                 WHERE report_id = ?4",
                params![next.as_str(), ts, actor.user_id, req.report_id],
            )
            .map_err(sql_err)?;
            tx.execute(
                "INSERT INTO approval_logs (report_id, action_by, action, comments, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![req.report_id, actor.user_id, req.action.as_str(), comments, ts],
            )
            .map_err(sql_err)?;
            let entry = AuditEntry {
                id: tx.last_insert_rowid(),
                report_id: req.report_id,
                actor_id: actor.user_id.clone(),
                action: req.action,
                comments,
                timestamp,
            };
            Ok(TransitionOutcome {
                previous: report.status,
                report: require_report(tx, req.report_id)?,
                entry,
            })
        });

        match &outcome {
            Ok(o) => tracing::info!(
                report_id = req.report_id,
                actor = %req.actor_id,
                action = %req.action,
                from = %o.previous,
                to = %o.report.status,
                "transition committed"
            ),
            Err(e) => tracing::debug!(
                report_id = req.report_id,
                actor = %req.actor_id,
                action = %req.action,
                error = %e,
                "transition refused"
            ),
        }
        outcome
    }

    async fn set_final_pdf(&self, report_id: i64, path: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE reports SET final_pdf_path = ?1 WHERE report_id = ?2",
                    params![path, report_id],
                )
                .map_err(sql_err)?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("report {}", report_id)));
            }
            Ok(())
        })
    }

    async fn notify(
        &self,
        user_id: &str,
        subject: &str,
        message: &str,
    ) -> Result<Notification, StoreError> {
        let created_at = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, subject, message, is_read, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![user_id, subject, message, fmt_ts(created_at)],
            )
            .map_err(sql_err)?;
            Ok(Notification {
                id: conn.last_insert_rowid(),
                user_id: user_id.to_string(),
                subject: subject.to_string(),
                message: message.to_string(),
                is_read: false,
                created_at,
            })
        })
    }

    async fn list_notifications(
        &self,
        user_id: &str,
        include_read: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, subject, message, is_read, created_at FROM notifications
                     WHERE user_id = ?1 AND (?2 OR is_read = 0)
                     ORDER BY created_at DESC, id DESC",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map(params![user_id, include_read], notification_from_row)
                .map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
    }

    async fn mark_notification_read(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn
                .execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])
                .map_err(sql_err)?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use logbook_types::AuditLog;
    use std::sync::Arc;

    pub(crate) fn user(id: &str, role: Role) -> User {
        User {
            user_id: id.to_string(),
            name: format!("{} name", id),
            role,
            email: format!("{}@example.com", id),
            emp_code: Some("E100".to_string()),
            designation: Some("Lead Dev".to_string()),
        }
    }

    pub(crate) async fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_user(&user("owner", Role::User)).await.unwrap();
        store.upsert_user(&user("rev", Role::Reviewer)).await.unwrap();
        store.upsert_user(&user("A1", Role::Approver)).await.unwrap();
        store.upsert_user(&user("A2", Role::Approver)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_edit_and_read_back() {
        let store = seeded().await;
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        assert_eq!(r.status, ReportStatus::Draft);
        assert_eq!(r.version, 1);

        store.set_field(r.report_id, "owner", "site", "Plant 2").await.unwrap();
        let r2 = store.set_field(r.report_id, "owner", "site", "Plant 3").await.unwrap();
        assert_eq!(r2.version, 3);
        assert_eq!(r2.fields.get("site"), Some("Plant 3"));
        assert_eq!(r2.fields.len(), 1);
    }

    #[tokio::test]
    async fn transition_writes_status_and_one_audit_entry_together() {
        let store = seeded().await;
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        let out = store
            .apply_transition(&TransitionRequest::new(r.report_id, "owner", Action::Submit))
            .await
            .unwrap();
        assert_eq!(out.previous, ReportStatus::Draft);
        assert_eq!(out.report.status, ReportStatus::Submitted);
        assert_eq!(out.report.version, 2);
        assert_eq!(out.entry.comments.as_deref(), Some("E100 - Lead Dev"));

        let timeline = store.timeline(r.report_id).await.unwrap();
        assert_eq!(timeline, vec![out.entry]);
    }

    #[tokio::test]
    async fn refused_transition_leaves_no_trace() {
        let store = seeded().await;
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        let err = store
            .apply_transition(&TransitionRequest::new(r.report_id, "A1", Action::Approve))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::InvalidTransition { .. })
        ));
        let after = store.get_report(r.report_id).await.unwrap().unwrap();
        assert_eq!(after.status, ReportStatus::Draft);
        assert_eq!(after.version, 1);
        assert!(store.timeline(r.report_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_info_blocks_submit() {
        let store = seeded().await;
        let mut owner = user("owner", Role::User);
        owner.designation = None;
        store.upsert_user(&owner).await.unwrap();
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        let err = store
            .apply_transition(&TransitionRequest::new(r.report_id, "owner", Action::Submit))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::MissingSignatureInfo(_))
        ));
        assert_eq!(
            store.get_report(r.report_id).await.unwrap().unwrap().status,
            ReportStatus::Draft
        );
    }

    #[tokio::test]
    async fn fields_frozen_after_endorsement() {
        let store = seeded().await;
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        for (actor, action) in [("owner", Action::Submit), ("rev", Action::Endorse)] {
            store
                .apply_transition(&TransitionRequest::new(r.report_id, actor, action))
                .await
                .unwrap();
        }
        let err = store
            .set_field(r.report_id, "owner", "site", "x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::NotEditable(_, ReportStatus::Endorsed))
        ));
    }

    #[tokio::test]
    async fn concurrent_endorsements_serialize() {
        let store = Arc::new(seeded().await);
        let r = store.create_report("owner", "Night shift", None).await.unwrap();
        store
            .apply_transition(&TransitionRequest::new(r.report_id, "owner", Action::Submit))
            .await
            .unwrap();
        store.upsert_user(&user("rev2", Role::Reviewer)).await.unwrap();

        let mut handles = Vec::new();
        for reviewer in ["rev", "rev2"] {
            let store = Arc::clone(&store);
            let id = r.report_id;
            handles.push(tokio::spawn(async move {
                store
                    .apply_transition(&TransitionRequest::new(id, reviewer, Action::Endorse))
                    .await
            }));
        }
        let mut ok = 0;
        let mut invalid = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Transition(TransitionError::InvalidTransition { from, .. })) => {
                    assert_eq!(from, ReportStatus::Endorsed);
                    invalid += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, invalid), (1, 1));
        assert_eq!(store.timeline(r.report_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn notifications_filter_read() {
        let store = seeded().await;
        let n1 = store.notify("owner", "Report approved", "done").await.unwrap();
        store.notify("owner", "Needs revision", "fix totals").await.unwrap();
        assert!(store.mark_notification_read(n1.id).await.unwrap());
        assert!(!store.mark_notification_read(9999).await.unwrap());
        let unread = store.list_notifications("owner", false).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].subject, "Needs revision");
        assert_eq!(store.list_notifications("owner", true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logbook.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_user(&user("owner", Role::User)).await.unwrap();
            let t = store.add_template("Daily", "templates/daily.xlsx", "admin").await.unwrap();
            store.create_report("owner", "Night shift", Some(t.id)).await.unwrap().report_id
        };
        let store = SqliteStore::open(&path).unwrap();
        let r = store.get_report(id).await.unwrap().unwrap();
        assert_eq!(r.title, "Night shift");
        let t = store.get_template(r.template_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(t.file_path, "templates/daily.xlsx");
        assert_eq!(store.list_templates().await.unwrap().len(), 1);
        assert_eq!(
            store
                .list_reports_by_status(ReportStatus::Draft, Some("owner"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn users_by_role_are_ordered() {
        let store = seeded().await;
        let approvers: Vec<String> = store
            .users_with_role(Role::Approver)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        assert_eq!(approvers, vec!["A1".to_string(), "A2".to_string()]);
        assert_eq!(store.users_with_role(Role::Reviewer).await.unwrap().len(), 1);
    }
}
