//! Upload sessions and the backend that serves them.
//!
//! An [`UploadSessionStore`] is constructed once and injected wherever
//! sessions are created or read. Sessions are immutable after creation and
//! expire 24 hours after they were created.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use quarry_contracts::{
    error::{QuarryError, QuarryResult},
    tool::{
        AnalyzeArgs, CollectionSchema, DataArg, QueryFilters, Row, ToolError, ToolResult,
        ROW_INDEX_FIELD,
    },
};
use quarry_core::traits::DataBackend;

use crate::{
    analysis,
    detect::ColumnDetector,
    filter::{apply_filters, FieldMap},
    spreadsheet::ParsedSheet,
};

/// The single collection an upload session represents.
pub const UPLOAD_COLLECTION: &str = "uploaded_data";

/// How long a session stays readable.
pub const SESSION_TTL_HOURS: i64 = 24;

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSchema {
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_row: Option<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    pub schema: UploadSchema,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at + ttl
    }
}

/// In-process session store keyed by random session id.
///
/// Expiry is enforced on read; `purge_expired` reclaims memory.
#[derive(Debug)]
pub struct UploadSessionStore {
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
    ttl: Duration,
}

impl Default for UploadSessionStore {
    fn default() -> Self {
        Self::new(Duration::hours(SESSION_TTL_HOURS))
    }
}

impl UploadSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store a parsed sheet under a fresh 128-bit hex session id.
    pub fn create(&self, sheet: ParsedSheet) -> QuarryResult<Arc<UploadSession>> {
        self.create_at(sheet, Utc::now())
    }

    pub fn create_at(&self, sheet: ParsedSheet, now: DateTime<Utc>) -> QuarryResult<Arc<UploadSession>> {
        let session_id = hex::encode(rand::random::<[u8; 16]>());
        let session = Arc::new(UploadSession {
            session_id: session_id.clone(),
            schema: UploadSchema {
                fields: sheet.fields,
                sample_row: sheet.rows.first().cloned(),
            },
            row_count: sheet.rows.len(),
            rows: sheet.rows,
            created_at: now,
        });

        let mut sessions = self.sessions.write().map_err(|_| QuarryError::UploadRejected {
            reason: "session store lock poisoned".to_string(),
        })?;
        sessions.insert(session_id.clone(), Arc::clone(&session));
        info!(session_id = %session_id, rows = session.row_count, "upload session created");
        Ok(session)
    }

    /// Fetch a live session. Unknown and expired ids are both
    /// `SessionNotFound`.
    pub fn get(&self, session_id: &str) -> QuarryResult<Arc<UploadSession>> {
        self.get_at(session_id, Utc::now())
    }

    pub fn get_at(&self, session_id: &str, now: DateTime<Utc>) -> QuarryResult<Arc<UploadSession>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .filter(|s| now < s.expires_at(self.ttl))
            .cloned()
            .ok_or_else(|| QuarryError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| now < s.expires_at(self.ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "expired upload sessions purged");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Serves one upload session as `uploaded_data`.
///
/// Every row carries its 1-based sheet position in `_rowIndex` so answers can
/// cite the rows they used.
#[derive(Debug, Clone)]
pub struct UploadBackend {
    session: Arc<UploadSession>,
    rows: Vec<Row>,
    fields: FieldMap,
}

impl UploadBackend {
    pub fn new(session: Arc<UploadSession>, detector: &ColumnDetector) -> Self {
        let rows: Vec<Row> = session
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut row = row.clone();
                row.insert(ROW_INDEX_FIELD.to_string(), Value::from(i as u64 + 1));
                row
            })
            .collect();
        let fields = detector.detect(session.rows.first());
        debug!(
            session_id = %session.session_id,
            date = %fields.date,
            amount = %fields.amount,
            category = %fields.category,
            "upload columns detected"
        );
        Self { session, rows, fields }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }
}

#[async_trait]
impl DataBackend for UploadBackend {
    fn name(&self) -> &str {
        "upload"
    }

    fn implicit_collection(&self) -> Option<&str> {
        Some(UPLOAD_COLLECTION)
    }

    async fn query_collection(&self, collection: &str, filters: &QueryFilters) -> QuarryResult<Vec<Row>> {
        if collection != UPLOAD_COLLECTION {
            debug!(collection = %collection, "upload session holds no such collection");
            return Ok(Vec::new());
        }
        Ok(apply_filters(&self.rows, filters, &self.fields))
    }

    async fn analyze_data(&self, _collection: Option<&str>, args: &AnalyzeArgs) -> QuarryResult<ToolResult> {
        let rows = match &args.data {
            DataArg::Absent => self.rows.as_slice(),
            DataArg::Inline(rows) => rows.as_slice(),
            DataArg::FromSteps(_) => {
                return Ok(ToolError::InvalidArguments {
                    reason: "data references plan steps that were not resolved".to_string(),
                }
                .into())
            }
        };
        Ok(analysis::analyze(
            rows,
            args.analysis_type,
            args.group_by.as_deref(),
            args.metric.as_deref(),
            &self.fields,
        ))
    }

    async fn collection_schema(&self, _collection: &str) -> QuarryResult<CollectionSchema> {
        Ok(CollectionSchema {
            collection: UPLOAD_COLLECTION.to_string(),
            fields: self.session.schema.fields.clone(),
            row_count: Some(self.session.row_count),
            row_indices: true,
        })
    }
}
