// pml-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Gateway Store
// Description: Durable capability, trace, checkpoint, and graph storage.
// Purpose: Persist gateway state with deterministic serialization on SQLite WAL.
// Dependencies: pml-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One WAL database backs every persistent interface: capabilities (unique
//! on code hash), execution and algorithm traces (idempotent inserts keyed by
//! UUID), checkpoints (pruned to the most recent N per workflow), the
//! adaptive threshold map, the tool dependency graph, and the semantic tool
//! index. Vector search is a cosine scan over stored little-endian f32
//! embeddings. Writes serialize on the connection mutex; conflicting
//! capability inserts surface as conflicts for the caller to resolve.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use pml_core::AlgorithmTrace;
use pml_core::Capability;
use pml_core::CapabilityFqdn;
use pml_core::CapabilityId;
use pml_core::CapabilityStats;
use pml_core::Checkpoint;
use pml_core::CheckpointId;
use pml_core::CheckpointStore;
use pml_core::ContextHash;
use pml_core::DependencyGraphStore;
use pml_core::Embedding;
use pml_core::ExecutionTrace;
use pml_core::HashDigest;
use pml_core::PermissionSet;
use pml_core::StoreError;
use pml_core::ThresholdRecord;
use pml_core::ThresholdStore;
use pml_core::Timestamp;
use pml_core::ToolHit;
use pml_core::ToolId;
use pml_core::ToolIndex;
use pml_core::TraceStore;
use pml_core::UserId;
use pml_core::Visibility;
use pml_core::WorkflowId;
use pml_core::interfaces::CapabilityStore;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Suggestion threshold clamp range.
const SUGGESTION_RANGE: (f64, f64) = (0.40, 0.90);

/// Explicit-search threshold clamp range.
const EXPLICIT_RANGE: (f64, f64) = (0.30, 0.80);

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` gateway store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config with defaults for the provided path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Unique-constraint conflict.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Io(message)
            }
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a `rusqlite` error into the store error type.
fn db_error(error: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = error
        && failure.code == ErrorCode::ConstraintViolation
    {
        return SqliteStoreError::Conflict(error.to_string());
    }
    SqliteStoreError::Db(error.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed gateway store.
#[derive(Clone)]
pub struct SqliteGatewayStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteGatewayStore {
    /// Opens the gateway store, initializing the schema when needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|err| db_error(&err))?;
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(|err| db_error(&err))?;
        connection
            .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
            .map_err(|err| db_error(&err))?;
        connection
            .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
            .map_err(|err| db_error(&err))?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the connection, mapping poisoning into a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("store mutex poisoned".to_string()))
    }
}

/// Creates the schema when absent and verifies the version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS capability (
                 id TEXT PRIMARY KEY,
                 namespace TEXT NOT NULL,
                 action TEXT NOT NULL,
                 code_snippet TEXT NOT NULL,
                 code_hash TEXT,
                 parameters_schema TEXT NOT NULL,
                 intent_embedding BLOB,
                 success_rate REAL NOT NULL,
                 usage_count INTEGER NOT NULL,
                 avg_duration_ms REAL NOT NULL,
                 last_used_at INTEGER,
                 visibility TEXT NOT NULL,
                 created_by TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 permission_set TEXT NOT NULL,
                 permission_confidence REAL NOT NULL,
                 community_id INTEGER
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_capability_code_hash
                 ON capability(code_hash) WHERE code_hash IS NOT NULL;
             CREATE TABLE IF NOT EXISTS execution_trace (
                 id TEXT PRIMARY KEY,
                 capability_id TEXT,
                 executed_at INTEGER NOT NULL,
                 success INTEGER NOT NULL,
                 duration_ms INTEGER NOT NULL,
                 error_type TEXT,
                 user_id TEXT NOT NULL,
                 payload TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS algorithm_trace (
                 trace_id TEXT PRIMARY KEY,
                 algorithm_name TEXT NOT NULL,
                 decision TEXT NOT NULL,
                 final_score REAL NOT NULL,
                 threshold_used REAL NOT NULL,
                 timestamp INTEGER NOT NULL,
                 payload TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS capability_dependency (
                 from_id TEXT NOT NULL,
                 to_id TEXT NOT NULL,
                 observed_count INTEGER NOT NULL,
                 confidence_score REAL NOT NULL,
                 edge_type TEXT NOT NULL,
                 edge_source TEXT NOT NULL,
                 PRIMARY KEY (from_id, to_id)
             );
             CREATE TABLE IF NOT EXISTS tool_catalog (
                 tool TEXT PRIMARY KEY,
                 description TEXT NOT NULL,
                 embedding BLOB,
                 community_id INTEGER
             );
             CREATE TABLE IF NOT EXISTS checkpoint (
                 id TEXT PRIMARY KEY,
                 workflow_id TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 layer INTEGER NOT NULL,
                 state TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_checkpoint_workflow
                 ON checkpoint(workflow_id, timestamp);
             CREATE TABLE IF NOT EXISTS adaptive_thresholds (
                 context_hash TEXT PRIMARY KEY,
                 context_keys TEXT NOT NULL,
                 suggestion_threshold REAL NOT NULL,
                 explicit_threshold REAL NOT NULL,
                 success_rate REAL NOT NULL,
                 sample_count INTEGER NOT NULL
             );",
        )
        .map_err(|err| db_error(&err))?;

    let version: Option<i64> = connection
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            connection
                .execute("INSERT INTO schema_version (version) VALUES (?1)", params![
                    SCHEMA_VERSION
                ])
                .map_err(|err| db_error(&err))?;
            Ok(())
        }
        Some(found) if found == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(SqliteStoreError::VersionMismatch(format!(
            "expected {SCHEMA_VERSION}, found {found}"
        ))),
    }
}

/// Ensures the database's parent directory exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Embedding Encoding
// ============================================================================

/// Encodes an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.as_slice().len() * 4);
    for value in embedding.as_slice() {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decodes little-endian f32 bytes into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Result<Embedding, SqliteStoreError> {
    if blob.len() % 4 != 0 {
        return Err(SqliteStoreError::Invalid("embedding blob length".to_string()));
    }
    let values: Vec<f32> = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Embedding::new(values).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Decodes one capability row.
#[allow(
    clippy::too_many_lines,
    reason = "Column decoding maps one-to-one onto the capability schema."
)]
fn capability_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Capability, Option<Vec<u8>>)> {
    let id: String = row.get("id")?;
    let namespace: String = row.get("namespace")?;
    let action: String = row.get("action")?;
    let code_snippet: String = row.get("code_snippet")?;
    let code_hash: Option<String> = row.get("code_hash")?;
    let parameters_schema: String = row.get("parameters_schema")?;
    let embedding_blob: Option<Vec<u8>> = row.get("intent_embedding")?;
    let success_rate: f64 = row.get("success_rate")?;
    let usage_count: i64 = row.get("usage_count")?;
    let avg_duration_ms: f64 = row.get("avg_duration_ms")?;
    let last_used_at: Option<i64> = row.get("last_used_at")?;
    let visibility: String = row.get("visibility")?;
    let created_by: String = row.get("created_by")?;
    let created_at: i64 = row.get("created_at")?;
    let permission_set: String = row.get("permission_set")?;
    let permission_confidence: f64 = row.get("permission_confidence")?;
    let community_id: Option<i64> = row.get("community_id")?;

    let capability = Capability {
        id: CapabilityId::new(id),
        fqdn: CapabilityFqdn::new(namespace, action),
        code_snippet,
        code_hash: code_hash.map(HashDigest::from_hex),
        parameters_schema: serde_json::from_str(&parameters_schema)
            .unwrap_or(serde_json::Value::Null),
        intent_embedding: None,
        stats: CapabilityStats {
            success_rate,
            usage_count: u64::try_from(usage_count).unwrap_or_default(),
            avg_duration_ms,
            last_used_at: last_used_at.map(Timestamp::from_unix_millis),
        },
        visibility: parse_visibility(&visibility),
        created_by: UserId::new(created_by),
        created_at: Timestamp::from_unix_millis(created_at),
        permission_set: parse_permission(&permission_set),
        permission_confidence,
        community_id,
    };
    Ok((capability, embedding_blob))
}

/// Parses a stored visibility label.
fn parse_visibility(label: &str) -> Visibility {
    match label {
        "project" => Visibility::Project,
        "org" => Visibility::Org,
        "public" => Visibility::Public,
        _ => Visibility::Private,
    }
}

/// Renders a visibility label.
const fn visibility_label(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Private => "private",
        Visibility::Project => "project",
        Visibility::Org => "org",
        Visibility::Public => "public",
    }
}

/// Parses a stored permission label.
fn parse_permission(label: &str) -> PermissionSet {
    match label {
        "readonly" => PermissionSet::Readonly,
        "filesystem" => PermissionSet::Filesystem,
        "network-api" => PermissionSet::NetworkApi,
        "mcp-standard" => PermissionSet::McpStandard,
        "trusted" => PermissionSet::Trusted,
        _ => PermissionSet::Minimal,
    }
}

/// Base capability select column list.
const CAPABILITY_COLUMNS: &str = "id, namespace, action, code_snippet, code_hash, \
     parameters_schema, intent_embedding, success_rate, usage_count, avg_duration_ms, \
     last_used_at, visibility, created_by, created_at, permission_set, \
     permission_confidence, community_id";

// ============================================================================
// SECTION: Capability Store
// ============================================================================

impl CapabilityStore for SqliteGatewayStore {
    fn insert(&self, capability: &Capability) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let schema = serde_json::to_string(&capability.parameters_schema)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let embedding = capability.intent_embedding.as_ref().map(embedding_to_blob);
        let usage = i64::try_from(capability.stats.usage_count).unwrap_or(i64::MAX);
        let result = guard.execute(
            "INSERT INTO capability (
                 id, namespace, action, code_snippet, code_hash, parameters_schema,
                 intent_embedding, success_rate, usage_count, avg_duration_ms,
                 last_used_at, visibility, created_by, created_at, permission_set,
                 permission_confidence, community_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                capability.id.as_str(),
                capability.fqdn.namespace,
                capability.fqdn.action,
                capability.code_snippet,
                capability.code_hash.as_ref().map(|digest| digest.value.clone()),
                schema,
                embedding,
                capability.stats.success_rate,
                usage,
                capability.stats.avg_duration_ms,
                capability.stats.last_used_at.map(Timestamp::as_unix_millis),
                visibility_label(capability.visibility),
                capability.created_by.as_str(),
                capability.created_at.as_unix_millis(),
                capability.permission_set.as_str(),
                capability.permission_confidence,
                capability.community_id,
            ],
        );
        result.map_err(|err| StoreError::from(db_error(&err))).map(|_| ())
    }

    fn find_by_hash(&self, hash: &HashDigest) -> Result<Option<Capability>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let sql = format!("SELECT {CAPABILITY_COLUMNS} FROM capability WHERE code_hash = ?1");
        let row = guard
            .query_row(&sql, params![hash.value], capability_from_row)
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(row.map(attach_embedding))
    }

    fn get(&self, id: &CapabilityId) -> Result<Option<Capability>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let sql = format!("SELECT {CAPABILITY_COLUMNS} FROM capability WHERE id = ?1");
        let row = guard
            .query_row(&sql, params![id.as_str()], capability_from_row)
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(row.map(attach_embedding))
    }

    fn find_by_fqdn(&self, fqdn: &CapabilityFqdn) -> Result<Option<Capability>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let sql = format!(
            "SELECT {CAPABILITY_COLUMNS} FROM capability WHERE namespace = ?1 AND action = ?2"
        );
        let row = guard
            .query_row(&sql, params![fqdn.namespace, fqdn.action], capability_from_row)
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(row.map(attach_embedding))
    }

    fn record_use(
        &self,
        id: &CapabilityId,
        success: bool,
        duration_ms: u64,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let row: Option<(f64, i64, f64)> = tx
            .query_row(
                "SELECT success_rate, usage_count, avg_duration_ms FROM capability WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let Some((success_rate, usage_count, avg_duration_ms)) = row else {
            return Err(StoreError::Missing(id.to_string()));
        };

        let mut stats = CapabilityStats {
            success_rate,
            usage_count: u64::try_from(usage_count).unwrap_or_default(),
            avg_duration_ms,
            last_used_at: None,
        };
        stats.record(success, duration_ms, at);

        tx.execute(
            "UPDATE capability SET success_rate = ?1, usage_count = ?2,
                 avg_duration_ms = ?3, last_used_at = ?4 WHERE id = ?5",
            params![
                stats.success_rate,
                i64::try_from(stats.usage_count).unwrap_or(i64::MAX),
                stats.avg_duration_ms,
                at.as_unix_millis(),
                id.as_str(),
            ],
        )
        .map_err(|err| StoreError::from(db_error(&err)))?;
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))
    }

    fn search_by_intent(
        &self,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<(Capability, f64)>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let sql = format!(
            "SELECT {CAPABILITY_COLUMNS} FROM capability WHERE intent_embedding IS NOT NULL"
        );
        let mut stmt =
            guard.prepare(&sql).map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = stmt
            .query_map([], capability_from_row)
            .map_err(|err| StoreError::from(db_error(&err)))?;

        let mut scored = Vec::new();
        for row in rows {
            let (capability, blob) = row.map_err(|err| StoreError::from(db_error(&err)))?;
            let Some(blob) = blob else {
                continue;
            };
            let stored = blob_to_embedding(&blob).map_err(StoreError::from)?;
            let similarity = embedding.cosine(&stored);
            let mut capability = capability;
            capability.intent_embedding = Some(stored);
            scored.push((capability, similarity));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn list_for_user(
        &self,
        user_id: &UserId,
        scope: Visibility,
        limit: usize,
    ) -> Result<Vec<Capability>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let sql = format!(
            "SELECT {CAPABILITY_COLUMNS} FROM capability
             WHERE created_by = ?1 OR visibility = ?2
             ORDER BY usage_count DESC, id ASC LIMIT ?3"
        );
        let mut stmt =
            guard.prepare(&sql).map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = stmt
            .query_map(
                params![
                    user_id.as_str(),
                    visibility_label(scope),
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                capability_from_row,
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let mut out = Vec::new();
        for row in rows {
            let pair = row.map_err(|err| StoreError::from(db_error(&err)))?;
            out.push(attach_embedding(pair));
        }
        Ok(out)
    }
}

/// Attaches the decoded embedding to a capability row pair.
fn attach_embedding((mut capability, blob): (Capability, Option<Vec<u8>>)) -> Capability {
    capability.intent_embedding = blob.as_deref().and_then(|blob| blob_to_embedding(blob).ok());
    capability
}

// ============================================================================
// SECTION: Trace Store
// ============================================================================

impl TraceStore for SqliteGatewayStore {
    fn insert_executions(&self, traces: &[ExecutionTrace]) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        for trace in traces {
            let payload = serde_json::to_string(trace)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT OR IGNORE INTO execution_trace (
                     id, capability_id, executed_at, success, duration_ms,
                     error_type, user_id, payload
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    trace.id.as_str(),
                    trace.capability_id.as_ref().map(CapabilityId::as_str),
                    trace.executed_at.as_unix_millis(),
                    i64::from(trace.success),
                    i64::try_from(trace.duration_ms).unwrap_or(i64::MAX),
                    trace.error_type.map(|kind| kind.as_code()),
                    trace.user_id.as_str(),
                    payload,
                ],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        }
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))
    }

    fn insert_algorithms(&self, traces: &[AlgorithmTrace]) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        for trace in traces {
            let payload = serde_json::to_string(trace)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            let decision = serde_json::to_string(&trace.decision)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT OR IGNORE INTO algorithm_trace (
                     trace_id, algorithm_name, decision, final_score,
                     threshold_used, timestamp, payload
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    trace.trace_id.as_str(),
                    trace.algorithm_name,
                    decision.trim_matches('"'),
                    trace.final_score,
                    trace.threshold_used,
                    trace.timestamp.as_unix_millis(),
                    payload,
                ],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        }
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))
    }
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

impl CheckpointStore for SqliteGatewayStore {
    fn save(&self, checkpoint: &Checkpoint, keep: usize) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let state = serde_json::to_string(&checkpoint.state)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        tx.execute(
            "INSERT INTO checkpoint (id, workflow_id, timestamp, layer, state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                checkpoint.id.as_str(),
                checkpoint.workflow_id.as_str(),
                checkpoint.timestamp.as_unix_millis(),
                i64::try_from(checkpoint.layer).unwrap_or(i64::MAX),
                state,
            ],
        )
        .map_err(|err| StoreError::from(db_error(&err)))?;
        tx.execute(
            "DELETE FROM checkpoint WHERE workflow_id = ?1 AND id NOT IN (
                 SELECT id FROM checkpoint WHERE workflow_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2
             )",
            params![
                checkpoint.workflow_id.as_str(),
                i64::try_from(keep.max(1)).unwrap_or(i64::MAX)
            ],
        )
        .map_err(|err| StoreError::from(db_error(&err)))?;
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))
    }

    fn latest(&self, workflow_id: &WorkflowId) -> Result<Option<Checkpoint>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                "SELECT id, workflow_id, timestamp, layer, state FROM checkpoint
                 WHERE workflow_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![workflow_id.as_str()],
                checkpoint_from_row,
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))
    }

    fn get(&self, id: &CheckpointId) -> Result<Option<Checkpoint>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                "SELECT id, workflow_id, timestamp, layer, state FROM checkpoint WHERE id = ?1",
                params![id.as_str()],
                checkpoint_from_row,
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))
    }

    fn delete_for(&self, workflow_id: &WorkflowId) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute("DELETE FROM checkpoint WHERE workflow_id = ?1", params![
                workflow_id.as_str()
            ])
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(())
    }
}

/// Decodes one checkpoint row.
fn checkpoint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let id: String = row.get(0)?;
    let workflow_id: String = row.get(1)?;
    let timestamp: i64 = row.get(2)?;
    let layer: i64 = row.get(3)?;
    let state: String = row.get(4)?;
    Ok(Checkpoint {
        id: CheckpointId::new(id),
        workflow_id: WorkflowId::new(workflow_id),
        timestamp: Timestamp::from_unix_millis(timestamp),
        layer: usize::try_from(layer).unwrap_or_default(),
        state: serde_json::from_str(&state).unwrap_or_default(),
    })
}

// ============================================================================
// SECTION: Threshold Store
// ============================================================================

impl ThresholdStore for SqliteGatewayStore {
    fn get(&self, context_hash: &ContextHash) -> Result<Option<ThresholdRecord>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                "SELECT context_hash, context_keys, suggestion_threshold,
                        explicit_threshold, success_rate, sample_count
                 FROM adaptive_thresholds WHERE context_hash = ?1",
                params![context_hash.as_str()],
                |row| {
                    let context_hash: String = row.get(0)?;
                    let context_keys: String = row.get(1)?;
                    Ok(ThresholdRecord {
                        context_hash: ContextHash::new(context_hash),
                        context_keys: serde_json::from_str(&context_keys).unwrap_or_default(),
                        suggestion_threshold: row.get(2)?,
                        explicit_threshold: row.get(3)?,
                        success_rate: row.get(4)?,
                        sample_count: u64::try_from(row.get::<_, i64>(5)?).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))
    }

    fn record_outcome(
        &self,
        context_hash: &ContextHash,
        context_keys: &[String],
        success: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock().map_err(StoreError::from)?;
        let tx = guard
            .transaction()
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let existing: Option<(f64, f64, f64, i64)> = tx
            .query_row(
                "SELECT suggestion_threshold, explicit_threshold, success_rate, sample_count
                 FROM adaptive_thresholds WHERE context_hash = ?1",
                params![context_hash.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?;

        let (mut suggestion, mut explicit, mut rate, count) =
            existing.unwrap_or((0.70, 0.55, 0.0, 0));
        let outcome = if success { 1.0 } else { 0.0 };
        #[allow(
            clippy::cast_precision_loss,
            reason = "Sample counts stay far below the f64 integer range."
        )]
        let next_count = (count + 1) as f64;
        rate += (outcome - rate) / next_count;
        // Successes lower the bar slightly; failures raise it faster.
        let nudge = if success { -0.01 } else { 0.02 };
        suggestion = (suggestion + nudge).clamp(SUGGESTION_RANGE.0, SUGGESTION_RANGE.1);
        explicit = (explicit + nudge).clamp(EXPLICIT_RANGE.0, EXPLICIT_RANGE.1);

        let keys = serde_json::to_string(context_keys)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        tx.execute(
            "INSERT INTO adaptive_thresholds (
                 context_hash, context_keys, suggestion_threshold,
                 explicit_threshold, success_rate, sample_count
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(context_hash) DO UPDATE SET
                 context_keys = excluded.context_keys,
                 suggestion_threshold = excluded.suggestion_threshold,
                 explicit_threshold = excluded.explicit_threshold,
                 success_rate = excluded.success_rate,
                 sample_count = excluded.sample_count",
            params![context_hash.as_str(), keys, suggestion, explicit, rate, count + 1],
        )
        .map_err(|err| StoreError::from(db_error(&err)))?;
        tx.commit().map_err(|err| StoreError::from(db_error(&err)))
    }
}

// ============================================================================
// SECTION: Dependency Graph Store
// ============================================================================

impl DependencyGraphStore for SqliteGatewayStore {
    fn observe_edge(&self, from: &ToolId, to: &ToolId) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO capability_dependency (
                     from_id, to_id, observed_count, confidence_score, edge_type, edge_source
                 ) VALUES (?1, ?2, 1, 0.1667, 'sequence', 'observed')
                 ON CONFLICT(from_id, to_id) DO UPDATE SET
                     observed_count = observed_count + 1,
                     confidence_score = CAST(observed_count + 1 AS REAL)
                         / CAST(observed_count + 6 AS REAL)",
                params![from.as_str(), to.as_str()],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(())
    }

    fn neighbors(&self, tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut stmt = guard
            .prepare(
                "SELECT to_id, confidence_score FROM capability_dependency WHERE from_id = ?1
                 UNION
                 SELECT from_id, confidence_score FROM capability_dependency WHERE to_id = ?1",
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = stmt
            .query_map(params![tool.as_str()], |row| {
                let name: String = row.get(0)?;
                let weight: f64 = row.get(1)?;
                Ok((ToolId::new(name), weight))
            })
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| StoreError::from(db_error(&err)))?);
        }
        Ok(out)
    }

    fn node_count(&self) -> Result<usize, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM (
                     SELECT from_id AS node FROM capability_dependency
                     UNION SELECT to_id FROM capability_dependency
                 )",
                [],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn edge_count(&self) -> Result<usize, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM capability_dependency", [], |row| row.get(0))
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn community(&self, tool: &ToolId) -> Result<Option<i64>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row(
                "SELECT community_id FROM tool_catalog WHERE tool = ?1",
                params![tool.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))
            .map(Option::flatten)
    }

    fn next_step_scores(&self, tool: &ToolId) -> Result<Vec<(ToolId, f64)>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let source_community: Option<i64> = guard
            .query_row(
                "SELECT community_id FROM tool_catalog WHERE tool = ?1",
                params![tool.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::from(db_error(&err)))?
            .flatten();

        let mut stmt = guard
            .prepare(
                "SELECT d.to_id, d.confidence_score, c.community_id
                 FROM capability_dependency d
                 LEFT JOIN tool_catalog c ON c.tool = d.to_id
                 WHERE d.from_id = ?1
                 ORDER BY d.confidence_score DESC, d.to_id ASC",
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = stmt
            .query_map(params![tool.as_str()], |row| {
                let name: String = row.get(0)?;
                let confidence: f64 = row.get(1)?;
                let community: Option<i64> = row.get(2)?;
                Ok((ToolId::new(name), confidence, community))
            })
            .map_err(|err| StoreError::from(db_error(&err)))?;

        let mut out = Vec::new();
        for row in rows {
            let (target, confidence, community) =
                row.map_err(|err| StoreError::from(db_error(&err)))?;
            let boost = match (source_community, community) {
                (Some(a), Some(b)) if a == b => 0.05,
                _ => 0.0,
            };
            out.push((target, (confidence + boost).clamp(0.0, 1.0)));
        }
        Ok(out)
    }
}

// ============================================================================
// SECTION: Tool Index
// ============================================================================

impl ToolIndex for SqliteGatewayStore {
    fn register_tool(
        &self,
        tool: &ToolId,
        description: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO tool_catalog (tool, description, embedding)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tool) DO UPDATE SET
                     description = excluded.description,
                     embedding = excluded.embedding",
                params![tool.as_str(), description, embedding_to_blob(embedding)],
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        Ok(())
    }

    fn search_tools(&self, embedding: &Embedding, k: usize) -> Result<Vec<ToolHit>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let mut stmt = guard
            .prepare(
                "SELECT tool, description, embedding FROM tool_catalog
                 WHERE embedding IS NOT NULL",
            )
            .map_err(|err| StoreError::from(db_error(&err)))?;
        let rows = stmt
            .query_map([], |row| {
                let tool: String = row.get(0)?;
                let description: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok((tool, description, blob))
            })
            .map_err(|err| StoreError::from(db_error(&err)))?;

        let mut hits = Vec::new();
        for row in rows {
            let (tool, description, blob) =
                row.map_err(|err| StoreError::from(db_error(&err)))?;
            let stored = blob_to_embedding(&blob).map_err(StoreError::from)?;
            hits.push(ToolHit {
                tool: ToolId::new(tool),
                description,
                score: embedding.cosine(&stored),
            });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
