//! SQLite record store.
//!
//! One database file holds every table the conversation core needs:
//! - `user_instances`, `channel_bindings`: tenant registry
//! - `sessions`, `session_messages`: conversation state
//! - `consent_records`, `memories`, `pattern_logs`: per-user data
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision) so string comparison in SQL matches chronological order.
//! Every table carries an `iid` autoincrement column used to break ties in
//! insertion order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use orgclaw_core::consent::{ConsentRecord, ConsentType};
use orgclaw_core::error::StoreError;
use orgclaw_core::memory::{MemoryQuery, MemoryRecord};
use orgclaw_core::pattern::PatternRecord;
use orgclaw_core::session::{Session, SessionMessage};
use orgclaw_core::store::{
    ConsentStore, MemoryStore, PatternStore, RecordStore, SessionStore, TenantStore,
};
use orgclaw_core::tenant::{ChannelBinding, InstanceStatus, UserInstance};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "user_instances table",
        r#"
        CREATE TABLE IF NOT EXISTS user_instances (
            iid           INTEGER PRIMARY KEY AUTOINCREMENT,
            instance_id   TEXT UNIQUE NOT NULL,
            user_id       TEXT NOT NULL,
            org_id        TEXT NOT NULL,
            team_id       TEXT NOT NULL,
            role_category TEXT NOT NULL,
            access_mode   TEXT NOT NULL DEFAULT 'forward',
            status        TEXT NOT NULL DEFAULT 'provisioning',
            folder        TEXT NOT NULL,
            created_at    TEXT NOT NULL
        )
        "#,
    ),
    (
        "channel_bindings table",
        r#"
        CREATE TABLE IF NOT EXISTS channel_bindings (
            iid              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_type     TEXT NOT NULL,
            channel_org_ref  TEXT NOT NULL,
            channel_user_ref TEXT NOT NULL,
            org_id           TEXT NOT NULL,
            instance_id      TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            UNIQUE (channel_type, channel_org_ref, channel_user_ref)
        )
        "#,
    ),
    (
        "sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            iid              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id       TEXT UNIQUE NOT NULL,
            instance_id      TEXT NOT NULL,
            channel_type     TEXT NOT NULL,
            channel_id       TEXT,
            started_at       TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'active',
            summary          TEXT,
            message_count    INTEGER NOT NULL DEFAULT 0,
            token_count      INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "sessions activity index",
        "CREATE INDEX IF NOT EXISTS idx_sessions_instance_activity \
         ON sessions(instance_id, status, last_activity_at DESC)",
    ),
    (
        "session_messages table",
        r#"
        CREATE TABLE IF NOT EXISTS session_messages (
            iid            INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id     TEXT UNIQUE NOT NULL,
            session_id     TEXT NOT NULL REFERENCES sessions(session_id),
            role           TEXT NOT NULL,
            content        TEXT NOT NULL,
            channel_type   TEXT,
            timestamp      TEXT NOT NULL,
            token_estimate INTEGER NOT NULL DEFAULT 0,
            is_compacted   INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "session_messages index",
        "CREATE INDEX IF NOT EXISTS idx_session_messages_session \
         ON session_messages(session_id, is_compacted)",
    ),
    (
        "consent_records table",
        r#"
        CREATE TABLE IF NOT EXISTS consent_records (
            instance_id  TEXT NOT NULL,
            consent_type TEXT NOT NULL,
            granted      INTEGER NOT NULL,
            granted_at   TEXT,
            withdrawn_at TEXT,
            version      TEXT NOT NULL,
            PRIMARY KEY (instance_id, consent_type)
        )
        "#,
    ),
    (
        "memories table",
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            iid              INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id        TEXT UNIQUE NOT NULL,
            instance_id      TEXT NOT NULL,
            memory_type      TEXT NOT NULL,
            content          TEXT NOT NULL,
            source_channel   TEXT,
            confidence       REAL NOT NULL DEFAULT 1.0,
            access_count     INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            expires_at       TEXT,
            is_deleted       INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "memories index",
        "CREATE INDEX IF NOT EXISTS idx_memories_instance \
         ON memories(instance_id, is_deleted, updated_at DESC)",
    ),
    (
        "pattern_logs table",
        r#"
        CREATE TABLE IF NOT EXISTS pattern_logs (
            iid            INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_id     TEXT UNIQUE NOT NULL,
            user_id_hash   TEXT NOT NULL,
            org_id         TEXT NOT NULL,
            team_id        TEXT NOT NULL,
            pattern_type   TEXT NOT NULL,
            category_l1    TEXT NOT NULL,
            category_l2    TEXT NOT NULL DEFAULT '',
            category_l3    TEXT NOT NULL DEFAULT '',
            metric_type    TEXT NOT NULL,
            metric_value   REAL NOT NULL,
            tools_involved TEXT NOT NULL DEFAULT '[]',
            timestamp      TEXT NOT NULL,
            period         TEXT NOT NULL
        )
        "#,
    ),
];

/// A SQLite-backed [`RecordStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // An in-memory database lives and dies with its connection
        let pool_options = if path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite record store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (name, sql) in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{name}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_instance(row: &SqliteRow) -> Result<UserInstance, StoreError> {
        Ok(UserInstance {
            instance_id: col(row, "instance_id")?,
            user_id: col(row, "user_id")?,
            org_id: col(row, "org_id")?,
            team_id: col(row, "team_id")?,
            role_category: col(row, "role_category")?,
            access_mode: parse_enum(row, "access_mode")?,
            status: parse_enum(row, "status")?,
            folder: col(row, "folder")?,
            created_at: ts_col(row, "created_at")?,
        })
    }

    fn row_to_binding(row: &SqliteRow) -> Result<ChannelBinding, StoreError> {
        Ok(ChannelBinding {
            channel_type: col(row, "channel_type")?,
            channel_org_ref: col(row, "channel_org_ref")?,
            channel_user_ref: col(row, "channel_user_ref")?,
            org_id: col(row, "org_id")?,
            instance_id: col(row, "instance_id")?,
            created_at: ts_col(row, "created_at")?,
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
        let message_count: i64 = col(row, "message_count")?;
        let token_count: i64 = col(row, "token_count")?;
        Ok(Session {
            session_id: col(row, "session_id")?,
            instance_id: col(row, "instance_id")?,
            channel_type: col(row, "channel_type")?,
            channel_id: col(row, "channel_id")?,
            started_at: ts_col(row, "started_at")?,
            last_activity_at: ts_col(row, "last_activity_at")?,
            status: parse_enum(row, "status")?,
            summary: col(row, "summary")?,
            message_count: message_count.max(0) as u64,
            token_count: token_count.max(0) as u64,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<SessionMessage, StoreError> {
        let token_estimate: i64 = col(row, "token_estimate")?;
        Ok(SessionMessage {
            message_id: col(row, "message_id")?,
            session_id: col(row, "session_id")?,
            role: parse_enum(row, "role")?,
            content: col(row, "content")?,
            channel_type: col(row, "channel_type")?,
            timestamp: ts_col(row, "timestamp")?,
            token_estimate: token_estimate.max(0) as u64,
            is_compacted: col(row, "is_compacted")?,
        })
    }

    fn row_to_consent(row: &SqliteRow) -> Result<ConsentRecord, StoreError> {
        let consent_type: String = col(row, "consent_type")?;
        Ok(ConsentRecord {
            instance_id: col(row, "instance_id")?,
            consent_type: ConsentType::from_str(&consent_type)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            granted: col(row, "granted")?,
            granted_at: opt_ts_col(row, "granted_at")?,
            withdrawn_at: opt_ts_col(row, "withdrawn_at")?,
            version: col(row, "version")?,
        })
    }

    fn row_to_memory(row: &SqliteRow) -> Result<MemoryRecord, StoreError> {
        let confidence: f64 = col(row, "confidence")?;
        let access_count: i64 = col(row, "access_count")?;
        Ok(MemoryRecord {
            memory_id: col(row, "memory_id")?,
            instance_id: col(row, "instance_id")?,
            memory_type: parse_enum(row, "memory_type")?,
            content: col(row, "content")?,
            source_channel: col(row, "source_channel")?,
            confidence: confidence as f32,
            access_count: access_count.clamp(0, u32::MAX as i64) as u32,
            last_accessed_at: opt_ts_col(row, "last_accessed_at")?,
            created_at: ts_col(row, "created_at")?,
            updated_at: ts_col(row, "updated_at")?,
            expires_at: opt_ts_col(row, "expires_at")?,
            is_deleted: col(row, "is_deleted")?,
        })
    }

    fn row_to_pattern(row: &SqliteRow) -> Result<PatternRecord, StoreError> {
        let tools_json: String = col(row, "tools_involved")?;
        let tools_involved: Vec<String> = serde_json::from_str(&tools_json)
            .map_err(|e| StoreError::Corrupt(format!("tools_involved: {e}")))?;
        Ok(PatternRecord {
            pattern_id: col(row, "pattern_id")?,
            user_id_hash: col(row, "user_id_hash")?,
            org_id: col(row, "org_id")?,
            team_id: col(row, "team_id")?,
            pattern_type: parse_enum(row, "pattern_type")?,
            category_l1: col(row, "category_l1")?,
            category_l2: col(row, "category_l2")?,
            category_l3: col(row, "category_l3")?,
            metric_type: parse_enum(row, "metric_type")?,
            metric_value: col(row, "metric_value")?,
            tools_involved,
            timestamp: ts_col(row, "timestamp")?,
            period: col(row, "period")?,
        })
    }
}

/// Fixed-width UTC timestamp; lexical order equals chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Query bound for [`ts`] comparisons. Instants before the epoch collapse
/// onto it so the text stays four-digit-year RFC 3339.
fn bound_ts(dt: &DateTime<Utc>) -> String {
    ts(&(*dt).max(DateTime::<Utc>::UNIX_EPOCH))
}

fn query_failed(what: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::QueryFailed(format!("{what}: {e}"))
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_ts(raw: &str, name: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{name} '{raw}': {e}")))
}

fn ts_col(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = col(row, name)?;
    parse_ts(&raw, name)
}

fn opt_ts_col(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = col(row, name)?;
    raw.map(|r| parse_ts(&r, name)).transpose()
}

fn parse_enum<T>(row: &SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    let raw: String = col(row, name)?;
    T::from_str(&raw).map_err(StoreError::Corrupt)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn insert_instance(&self, instance: &UserInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_instances
                (instance_id, user_id, org_id, team_id, role_category, access_mode, status, folder, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.user_id)
        .bind(&instance.org_id)
        .bind(&instance.team_id)
        .bind(&instance.role_category)
        .bind(instance.access_mode.as_str())
        .bind(instance.status.as_str())
        .bind(&instance.folder)
        .bind(ts(&instance.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("instance {}", instance.instance_id))
            } else {
                StoreError::Storage(format!("INSERT instance failed: {e}"))
            }
        })?;

        debug!(instance_id = %instance.instance_id, "Stored user instance");
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<UserInstance>, StoreError> {
        let row = sqlx::query("SELECT * FROM user_instances WHERE instance_id = ?1")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("GET instance"))?;

        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE user_instances SET status = ?2 WHERE instance_id = ?1")
            .bind(instance_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE instance status failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_binding(&self, binding: &ChannelBinding) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_bindings
                (channel_type, channel_org_ref, channel_user_ref, org_id, instance_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&binding.channel_type)
        .bind(&binding.channel_org_ref)
        .bind(&binding.channel_user_ref)
        .bind(&binding.org_id)
        .bind(&binding.instance_id)
        .bind(ts(&binding.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "binding {}:{}:{}",
                    binding.channel_type, binding.channel_org_ref, binding.channel_user_ref
                ))
            } else {
                StoreError::Storage(format!("INSERT binding failed: {e}"))
            }
        })?;

        Ok(())
    }

    async fn find_binding(
        &self,
        channel_type: &str,
        channel_org_ref: &str,
        channel_user_ref: &str,
    ) -> Result<Option<ChannelBinding>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM channel_bindings
            WHERE channel_type = ?1 AND channel_org_ref = ?2 AND channel_user_ref = ?3
            "#,
        )
        .bind(channel_type)
        .bind(channel_org_ref)
        .bind(channel_user_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("FIND binding"))?;

        row.as_ref().map(Self::row_to_binding).transpose()
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (session_id, instance_id, channel_type, channel_id, started_at, last_activity_at,
                 status, summary, message_count, token_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.instance_id)
        .bind(&session.channel_type)
        .bind(&session.channel_id)
        .bind(ts(&session.started_at))
        .bind(ts(&session.last_activity_at))
        .bind(session.status.as_str())
        .bind(&session.summary)
        .bind(session.message_count as i64)
        .bind(session.token_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("GET session"))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                last_activity_at = ?2,
                status = ?3,
                summary = ?4,
                message_count = ?5,
                token_count = ?6
            WHERE session_id = ?1
            "#,
        )
        .bind(&session.session_id)
        .bind(ts(&session.last_activity_at))
        .bind(session.status.as_str())
        .bind(&session.summary)
        .bind(session.message_count as i64)
        .bind(session.token_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE session failed: {e}")))?;

        Ok(())
    }

    async fn find_active_session(
        &self,
        instance_id: &str,
        channel_type: &str,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE instance_id = ?1 AND channel_type = ?2 AND status = 'active'
            ORDER BY last_activity_at DESC, iid DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .bind(channel_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("FIND active session"))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn find_recent_active_session(
        &self,
        instance_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE instance_id = ?1 AND status = 'active' AND last_activity_at > ?2
            ORDER BY last_activity_at DESC, iid DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .bind(bound_ts(&since))
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("FIND recent session"))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn expire_idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<u64, StoreError> {
        let sql = if inclusive {
            "UPDATE sessions SET status = 'expired' WHERE status = 'active' AND last_activity_at <= ?1"
        } else {
            "UPDATE sessions SET status = 'expired' WHERE status = 'active' AND last_activity_at < ?1"
        };

        let result = sqlx::query(sql)
            .bind(bound_ts(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("EXPIRE sessions failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn list_recent_sessions(
        &self,
        instance_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE instance_id = ?1
            ORDER BY last_activity_at DESC, iid DESC
            LIMIT ?2
            "#,
        )
        .bind(instance_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("LIST sessions"))?;

        rows.iter().map(Self::row_to_session).collect()
    }

    async fn insert_message(&self, message: &SessionMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_messages
                (message_id, session_id, role, content, channel_type, timestamp, token_estimate, is_compacted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.channel_type)
        .bind(ts(&message.timestamp))
        .bind(message.token_estimate as i64)
        .bind(message.is_compacted)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;

        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        include_compacted: bool,
    ) -> Result<Vec<SessionMessage>, StoreError> {
        let sql = if include_compacted {
            "SELECT * FROM session_messages WHERE session_id = ?1 ORDER BY iid ASC"
        } else {
            "SELECT * FROM session_messages WHERE session_id = ?1 AND is_compacted = 0 ORDER BY iid ASC"
        };

        let rows = sqlx::query(sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("LIST messages"))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn mark_compacted(&self, message_ids: &[String]) -> Result<u64, StoreError> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE session_messages SET is_compacted = 1 WHERE is_compacted = 0 AND message_id IN (");
        let mut ids = qb.separated(", ");
        for id in message_ids {
            ids.push_bind(id.as_str());
        }
        ids.push_unseparated(")");

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("MARK compacted failed: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConsentStore for SqliteStore {
    async fn get_consent(
        &self,
        instance_id: &str,
        consent_type: ConsentType,
    ) -> Result<Option<ConsentRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM consent_records WHERE instance_id = ?1 AND consent_type = ?2",
        )
        .bind(instance_id)
        .bind(consent_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("GET consent"))?;

        row.as_ref().map(Self::row_to_consent).transpose()
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO consent_records
                (instance_id, consent_type, granted, granted_at, withdrawn_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(instance_id, consent_type) DO UPDATE SET
                granted = excluded.granted,
                granted_at = excluded.granted_at,
                withdrawn_at = excluded.withdrawn_at,
                version = excluded.version
            "#,
        )
        .bind(&record.instance_id)
        .bind(record.consent_type.as_str())
        .bind(record.granted)
        .bind(record.granted_at.as_ref().map(ts))
        .bind(record.withdrawn_at.as_ref().map(ts))
        .bind(&record.version)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT consent failed: {e}")))?;

        Ok(())
    }

    async fn list_consents(&self, instance_id: &str) -> Result<Vec<ConsentRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM consent_records WHERE instance_id = ?1 ORDER BY consent_type ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("LIST consents"))?;

        rows.iter().map(Self::row_to_consent).collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn insert_memory(&self, memory: &MemoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO memories
                (memory_id, instance_id, memory_type, content, source_channel, confidence,
                 access_count, last_accessed_at, created_at, updated_at, expires_at, is_deleted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&memory.memory_id)
        .bind(&memory.instance_id)
        .bind(memory.memory_type.as_str())
        .bind(&memory.content)
        .bind(&memory.source_channel)
        .bind(memory.confidence as f64)
        .bind(memory.access_count as i64)
        .bind(memory.last_accessed_at.as_ref().map(ts))
        .bind(ts(&memory.created_at))
        .bind(ts(&memory.updated_at))
        .bind(memory.expires_at.as_ref().map(ts))
        .bind(memory.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT memory failed: {e}")))?;

        Ok(())
    }

    async fn get_memory(&self, memory_id: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM memories WHERE memory_id = ?1")
            .bind(memory_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("GET memory"))?;

        row.as_ref().map(Self::row_to_memory).transpose()
    }

    async fn query_memories(
        &self,
        instance_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM memories WHERE instance_id = ");
        qb.push_bind(instance_id);
        qb.push(" AND is_deleted = 0 AND (expires_at IS NULL OR expires_at > ");
        qb.push_bind(ts(&Utc::now()));
        qb.push(")");

        if let Some(memory_type) = query.memory_type {
            qb.push(" AND memory_type = ");
            qb.push_bind(memory_type.as_str());
        }

        if !query.keywords.is_empty() {
            qb.push(" AND (");
            let mut any = qb.separated(" OR ");
            for keyword in &query.keywords {
                any.push("LOWER(content) LIKE ");
                any.push_bind_unseparated(format!("%{}%", keyword.to_lowercase()));
            }
            any.push_unseparated(")");
        }

        qb.push(" ORDER BY updated_at DESC, iid DESC");
        if query.limit > 0 {
            qb.push(" LIMIT ");
            qb.push_bind(query.limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("QUERY memories"))?;

        rows.iter().map(Self::row_to_memory).collect()
    }

    async fn update_memory(&self, memory: &MemoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE memories SET
                memory_type = ?2,
                content = ?3,
                source_channel = ?4,
                confidence = ?5,
                access_count = ?6,
                last_accessed_at = ?7,
                updated_at = ?8,
                expires_at = ?9,
                is_deleted = ?10
            WHERE memory_id = ?1
            "#,
        )
        .bind(&memory.memory_id)
        .bind(memory.memory_type.as_str())
        .bind(&memory.content)
        .bind(&memory.source_channel)
        .bind(memory.confidence as f64)
        .bind(memory.access_count as i64)
        .bind(memory.last_accessed_at.as_ref().map(ts))
        .bind(ts(&memory.updated_at))
        .bind(memory.expires_at.as_ref().map(ts))
        .bind(memory.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE memory failed: {e}")))?;

        Ok(())
    }

    async fn record_access(&self, memory_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?2 WHERE memory_id = ?1",
        )
        .bind(memory_id)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("RECORD access failed: {e}")))?;

        Ok(())
    }

    async fn soft_delete_memory(&self, memory_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE memories SET is_deleted = 1, updated_at = ?2 WHERE memory_id = ?1 AND is_deleted = 0",
        )
        .bind(memory_id)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("DELETE memory failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_all_memories(&self, instance_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE memories SET is_deleted = 1, updated_at = ?2 WHERE instance_id = ?1 AND is_deleted = 0",
        )
        .bind(instance_id)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("DELETE memories failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_memories(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at < ?1")
                .bind(ts(&now))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("PRUNE memories failed: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PatternStore for SqliteStore {
    async fn insert_pattern(&self, record: &PatternRecord) -> Result<(), StoreError> {
        let tools_json = serde_json::to_string(&record.tools_involved)
            .map_err(|e| StoreError::Storage(format!("tools serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO pattern_logs
                (pattern_id, user_id_hash, org_id, team_id, pattern_type, category_l1, category_l2,
                 category_l3, metric_type, metric_value, tools_involved, timestamp, period)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&record.pattern_id)
        .bind(&record.user_id_hash)
        .bind(&record.org_id)
        .bind(&record.team_id)
        .bind(record.pattern_type.as_str())
        .bind(&record.category_l1)
        .bind(&record.category_l2)
        .bind(&record.category_l3)
        .bind(record.metric_type.as_str())
        .bind(record.metric_value)
        .bind(&tools_json)
        .bind(ts(&record.timestamp))
        .bind(&record.period)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT pattern failed: {e}")))?;

        Ok(())
    }

    async fn list_patterns(&self, org_id: &str) -> Result<Vec<PatternRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pattern_logs WHERE org_id = ?1 ORDER BY iid ASC")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("LIST patterns"))?;

        rows.iter().map(Self::row_to_pattern).collect()
    }
}

impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orgclaw_core::memory::MemoryType;
    use orgclaw_core::pattern::{MetricType, PatternType};
    use orgclaw_core::session::{Role, SessionStatus};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn instance() -> UserInstance {
        UserInstance::new("u-42", "acme", "platform", "engineering")
    }

    #[tokio::test]
    async fn instance_roundtrip_and_status_update() {
        let db = test_store().await;
        let inst = instance();
        db.insert_instance(&inst).await.unwrap();

        let fetched = db.get_instance(&inst.instance_id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u-42");
        assert_eq!(fetched.status, InstanceStatus::Provisioning);

        assert!(
            db.update_instance_status(&inst.instance_id, InstanceStatus::Active)
                .await
                .unwrap()
        );
        let fetched = db.get_instance(&inst.instance_id).await.unwrap().unwrap();
        assert!(fetched.is_active());

        assert!(
            !db.update_instance_status("missing", InstanceStatus::Active)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_binding_is_a_conflict() {
        let db = test_store().await;
        let inst = instance();
        db.insert_instance(&inst).await.unwrap();

        let binding = ChannelBinding::for_instance(&inst, "slack", "T1", "U1");
        db.insert_binding(&binding).await.unwrap();
        let err = db.insert_binding(&binding).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = db.find_binding("slack", "T1", "U1").await.unwrap().unwrap();
        assert_eq!(found.instance_id, inst.instance_id);
        assert!(db.find_binding("slack", "T1", "U2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_session_lookup_prefers_most_recent_activity() {
        let db = test_store().await;
        let mut older = Session::new("inst-1", "slack", None);
        older.last_activity_at = Utc::now() - Duration::minutes(10);
        let newer = Session::new("inst-1", "slack", None);
        db.insert_session(&older).await.unwrap();
        db.insert_session(&newer).await.unwrap();

        let found = db.find_active_session("inst-1", "slack").await.unwrap().unwrap();
        assert_eq!(found.session_id, newer.session_id);
        assert!(db.find_active_session("inst-1", "teams").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_session_respects_window() {
        let db = test_store().await;
        let mut stale = Session::new("inst-1", "slack", None);
        stale.last_activity_at = Utc::now() - Duration::minutes(45);
        db.insert_session(&stale).await.unwrap();

        let since = Utc::now() - Duration::minutes(30);
        assert!(
            db.find_recent_active_session("inst-1", since)
                .await
                .unwrap()
                .is_none()
        );

        let since = Utc::now() - Duration::minutes(60);
        let found = db
            .find_recent_active_session("inst-1", since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, stale.session_id);
    }

    #[tokio::test]
    async fn expire_idle_sessions_only_touches_active() {
        let db = test_store().await;
        let mut idle = Session::new("inst-1", "slack", None);
        idle.last_activity_at = Utc::now() - Duration::hours(3);
        let mut closed = Session::new("inst-1", "email", None);
        closed.last_activity_at = Utc::now() - Duration::hours(3);
        closed.status = SessionStatus::Closed;
        let fresh = Session::new("inst-1", "teams", None);
        for s in [&idle, &closed, &fresh] {
            db.insert_session(s).await.unwrap();
        }

        let expired = db
            .expire_idle_sessions(Utc::now() - Duration::hours(1), false)
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let idle = db.get_session(&idle.session_id).await.unwrap().unwrap();
        assert_eq!(idle.status, SessionStatus::Expired);
        let closed = db.get_session(&closed.session_id).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn earliest_cutoff_orders_before_every_session() {
        let db = test_store().await;
        let mut old = Session::new("inst-1", "slack", None);
        old.last_activity_at = Utc::now() - Duration::days(400);
        db.insert_session(&old).await.unwrap();

        let found = db
            .find_recent_active_session("inst-1", DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, old.session_id);

        let expired = db
            .expire_idle_sessions(DateTime::<Utc>::MIN_UTC, false)
            .await
            .unwrap();
        assert_eq!(expired, 0);
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_and_compaction_flag() {
        let db = test_store().await;
        let session = Session::new("inst-1", "slack", None);
        db.insert_session(&session).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..4 {
            let msg = SessionMessage::new(
                &session.session_id,
                if i % 2 == 0 { Role::User } else { Role::Assistant },
                format!("message {i}"),
                Some("slack".into()),
                3,
            );
            ids.push(msg.message_id.clone());
            db.insert_message(&msg).await.unwrap();
        }

        let changed = db.mark_compacted(&ids[..2]).await.unwrap();
        assert_eq!(changed, 2);

        let live = db.list_messages(&session.session_id, false).await.unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].content, "message 2");

        let all = db.list_messages(&session.session_id, true).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].content, "message 0");
        assert!(all[0].is_compacted);
    }

    #[tokio::test]
    async fn consent_upsert_overwrites() {
        let db = test_store().await;
        let mut record = ConsentRecord {
            instance_id: "inst-1".into(),
            consent_type: ConsentType::DataProcessing,
            granted: true,
            granted_at: Some(Utc::now()),
            withdrawn_at: None,
            version: "1.0".into(),
        };
        db.upsert_consent(&record).await.unwrap();

        record.granted = false;
        record.withdrawn_at = Some(Utc::now());
        db.upsert_consent(&record).await.unwrap();

        let fetched = db
            .get_consent("inst-1", ConsentType::DataProcessing)
            .await
            .unwrap()
            .unwrap();
        assert!(!fetched.granted);
        assert!(fetched.withdrawn_at.is_some());
        assert_eq!(db.list_consents("inst-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_query_filters_deleted_expired_and_keywords() {
        let db = test_store().await;
        let keep = MemoryRecord::new("inst-1", MemoryType::Preference, "Prefers Rust over Go");
        let mut expired = MemoryRecord::new("inst-1", MemoryType::Fact, "Rust meetup was Tuesday");
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        let deleted = MemoryRecord::new("inst-1", MemoryType::Fact, "Rust is deleted");
        let other = MemoryRecord::new("inst-1", MemoryType::Fact, "Lives in Lisbon");
        for m in [&keep, &expired, &deleted, &other] {
            db.insert_memory(m).await.unwrap();
        }
        assert!(db.soft_delete_memory(&deleted.memory_id).await.unwrap());

        let query = MemoryQuery {
            keywords: vec!["rust".into()],
            limit: 10,
            ..Default::default()
        };
        let found = db.query_memories("inst-1", &query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].memory_id, keep.memory_id);

        let by_type = MemoryQuery {
            memory_type: Some(MemoryType::Fact),
            limit: 10,
            ..Default::default()
        };
        let facts = db.query_memories("inst-1", &by_type).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "Lives in Lisbon");

        assert_eq!(db.delete_expired_memories(Utc::now()).await.unwrap(), 1);
        assert!(db.get_memory(&expired.memory_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_access_bumps_counter() {
        let db = test_store().await;
        let mem = MemoryRecord::new("inst-1", MemoryType::Fact, "Works remotely");
        db.insert_memory(&mem).await.unwrap();
        db.record_access(&mem.memory_id).await.unwrap();
        db.record_access(&mem.memory_id).await.unwrap();

        let fetched = db.get_memory(&mem.memory_id).await.unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
        assert!(fetched.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn pattern_roundtrip_keeps_tool_list() {
        let db = test_store().await;
        let record = PatternRecord {
            pattern_id: "p-1".into(),
            user_id_hash: "0123456789abcdef".into(),
            org_id: "acme".into(),
            team_id: "platform".into(),
            pattern_type: PatternType::TimeAllocation,
            category_l1: "analysis".into(),
            category_l2: String::new(),
            category_l3: String::new(),
            metric_type: MetricType::Duration,
            metric_value: 1250.0,
            tools_involved: vec!["crm".into(), "spreadsheet_tools".into()],
            timestamp: Utc::now(),
            period: "2026-W07".into(),
        };
        db.insert_pattern(&record).await.unwrap();

        let listed = db.list_patterns("acme").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tools_involved, record.tools_involved);
        assert_eq!(listed[0].pattern_type, PatternType::TimeAllocation);
    }
}
