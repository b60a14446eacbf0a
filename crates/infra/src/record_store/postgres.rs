//! Postgres-backed record store.
//!
//! Rows live in a single `content_items` table. Issue uniqueness is enforced
//! by a unique index and the version check is part of the `UPDATE`'s `WHERE`
//! clause, so both hold under concurrent writers without explicit locking.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | FaultKind | Transient |
//! |------------|----------------------|-----------|-----------|
//! | Database (unique violation) | `23505` | `unique_violation` | no |
//! | Database (serialization failure) | `40001` | `conflict` | yes |
//! | Database (other) | Any other | `internal` | no |
//! | PoolTimedOut | N/A | `timeout` | yes |
//! | Io / Tls | N/A | `network` | yes |
//! | PoolClosed / WorkerCrashed | N/A | `unavailable` | yes |
//! | RowNotFound | N/A | `not_found` | no |
//! | Other | N/A | `internal` | no |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use async_trait::async_trait;
use forgepress_content::{ContentItem, ContentPatch};
use forgepress_core::{ContentKey, Fault, FaultKind, IssueNumber};

use super::r#trait::RecordStore;

/// DDL for the `content_items` table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_items (
    key         UUID PRIMARY KEY,
    issue       BIGINT NOT NULL CHECK (issue > 0),
    title       TEXT NOT NULL,
    version     BIGINT NOT NULL CHECK (version >= 1),
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS content_items_issue_key ON content_items (issue);
"#;

const COLUMNS: &str = "key, issue, title, version, created_at, updated_at";

/// Postgres-backed record store.
///
/// Uses the SQLx connection pool, so it is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the table and index if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), Fault> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        operation: &str,
        condition: &str,
        lookup: Lookup,
    ) -> Result<Option<ContentItem>, Fault> {
        let sql = format!("SELECT {COLUMNS} FROM content_items WHERE {condition}");
        let query = sqlx::query(&sql);
        let query = match lookup {
            Lookup::Key(key) => query.bind(*key.as_uuid()),
            Lookup::Issue(issue) => query.bind(i64::from(issue.get())),
        };

        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.as_ref().map(|r| row_to_item(operation, r)).transpose()
    }
}

enum Lookup {
    Key(ContentKey),
    Issue(IssueNumber),
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self), fields(key = %key), err)]
    async fn select_by_id(&self, key: ContentKey) -> Result<Option<ContentItem>, Fault> {
        self.fetch_one_where("select_by_id", "key = $1", Lookup::Key(key))
            .await
    }

    #[instrument(skip(self), fields(issue = %issue), err)]
    async fn select_by_issue(&self, issue: IssueNumber) -> Result<Option<ContentItem>, Fault> {
        self.fetch_one_where("select_by_issue", "issue = $1", Lookup::Issue(issue))
            .await
    }

    #[instrument(skip(self, item), fields(key = %item.key, issue = %item.issue), err)]
    async fn insert(&self, item: ContentItem) -> Result<ContentItem, Fault> {
        let sql = format!(
            "INSERT INTO content_items ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(*item.key.as_uuid())
            .bind(i64::from(item.issue.get()))
            .bind(&item.title)
            .bind(version_to_db(item.version)?)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        row_to_item("insert", &row)
    }

    #[instrument(skip(self, patch), fields(key = %key), err)]
    async fn update_where(
        &self,
        key: ContentKey,
        expected_version: u64,
        patch: &ContentPatch,
    ) -> Result<Option<ContentItem>, Fault> {
        let sql = format!(
            r#"
            UPDATE content_items
            SET issue = COALESCE($3, issue),
                title = COALESCE($4, title),
                version = version + 1,
                updated_at = $5
            WHERE key = $1 AND version = $2
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(*key.as_uuid())
            .bind(version_to_db(expected_version)?)
            .bind(patch.issue.map(|issue| i64::from(issue.get())))
            .bind(patch.title.as_deref())
            .bind(Utc::now())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_where", e))?;

        row.as_ref().map(|r| row_to_item("update_where", r)).transpose()
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn delete_by_id(&self, key: ContentKey) -> Result<(), Fault> {
        sqlx::query("DELETE FROM content_items WHERE key = $1")
            .bind(*key.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_by_id", e))?;
        Ok(())
    }
}

fn version_to_db(version: u64) -> Result<i64, Fault> {
    i64::try_from(version)
        .map_err(|_| Fault::permanent(FaultKind::InvalidRequest, format!("version {version} out of range")))
}

fn row_to_item(operation: &str, row: &PgRow) -> Result<ContentItem, Fault> {
    let decode = |e: sqlx::Error| Fault::internal(format!("failed to decode row in {operation}: {e}"));

    let key: uuid::Uuid = row.try_get("key").map_err(decode)?;
    let issue: i64 = row.try_get("issue").map_err(decode)?;
    let title: String = row.try_get("title").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    let issue = u32::try_from(issue)
        .ok()
        .and_then(|n| IssueNumber::new(n).ok())
        .ok_or_else(|| Fault::internal(format!("stored issue {issue} is out of range")))?;
    let version = u64::try_from(version)
        .map_err(|_| Fault::internal(format!("stored version {version} is negative")))?;

    Ok(ContentItem {
        key: ContentKey::from_uuid(key),
        issue,
        title,
        version,
        created_at,
        updated_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> Fault {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => Fault::permanent(FaultKind::UniqueViolation, msg),
                Some("40001") => Fault::transient(FaultKind::Conflict, msg),
                _ => Fault::internal(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            Fault::transient(FaultKind::Timeout, format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::Io(e) => Fault::transient(FaultKind::Network, format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => Fault::transient(FaultKind::Network, format!("tls error in {operation}: {e}")),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => Fault::transient(
            FaultKind::Unavailable,
            format!("connection pool unavailable in {operation}"),
        ),
        sqlx::Error::RowNotFound => Fault::not_found(format!("row not found in {operation}")),
        other => Fault::internal(format!("sqlx error in {operation}: {other}")),
    }
}
