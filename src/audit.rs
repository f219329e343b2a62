//! History records written alongside mutations.
//!
//! The history write runs after the primary write has committed and is not
//! part of its transaction. A failed history write is logged and dropped; it
//! never turns a successful mutation into an error.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::collection::{now_rfc3339, Collection};
use crate::ipc::error::ActionResult;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Restore,
    Purge,
    Issue,
    Return,
    Sale,
    Restock,
    Generate,
    Pay,
    Mark,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Purge => "purge",
            Self::Issue => "issue",
            Self::Return => "return",
            Self::Sale => "sale",
            Self::Restock => "restock",
            Self::Generate => "generate",
            Self::Pay => "pay",
            Self::Mark => "mark",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action_type: ActionType,
    pub message: String,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action_type: ActionType,
        coll: Collection,
        entity_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            message: message.into(),
            entity_type: coll.entity_type(),
            entity_id: Some(entity_id.to_string()),
        }
    }
}

/// Where history goes. Kept behind a trait so a mutation does not care
/// whether history is stored, disabled, or failing.
pub trait AuditSink {
    fn append(&self, session: &Session, entry: &AuditEntry) -> ActionResult<()>;
}

pub struct SqliteAudit<'a> {
    pub conn: &'a Connection,
}

impl AuditSink for SqliteAudit<'_> {
    fn append(&self, session: &Session, entry: &AuditEntry) -> ActionResult<()> {
        self.conn.execute(
            "INSERT INTO history(id, school_id, action_type, message, performed_by, entity_id, entity_type, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &session.school_id,
                entry.action_type.as_str(),
                &entry.message,
                &session.user_id,
                &entry.entity_id,
                entry.entity_type,
                now_rfc3339(),
            ),
        )?;
        Ok(())
    }
}

pub struct DisabledAudit;

impl AuditSink for DisabledAudit {
    fn append(&self, _session: &Session, _entry: &AuditEntry) -> ActionResult<()> {
        Ok(())
    }
}

/// Best-effort append: errors are logged, not returned.
pub fn record(sink: &dyn AuditSink, session: &Session, entry: AuditEntry) {
    if let Err(e) = sink.append(session, &entry) {
        tracing::warn!(
            action = entry.action_type.as_str(),
            entity_type = entry.entity_type,
            entity_id = entry.entity_id.as_deref().unwrap_or(""),
            error = %e,
            "history write dropped"
        );
    }
}

#[derive(Debug, Default)]
pub struct HistoryFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: i64,
}

pub fn list(conn: &Connection, school_id: &str, filter: &HistoryFilter) -> ActionResult<Vec<Value>> {
    let mut sql = String::from(
        "SELECT id, action_type, message, performed_by, entity_id, entity_type, created_at
         FROM history
         WHERE school_id = ?",
    );
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(school_id.to_string())];
    if let Some(t) = &filter.entity_type {
        sql.push_str(" AND entity_type = ?");
        bind.push(SqlValue::Text(t.clone()));
    }
    if let Some(id) = &filter.entity_id {
        sql.push_str(" AND entity_id = ?");
        bind.push(SqlValue::Text(id.clone()));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
    bind.push(SqlValue::Integer(filter.limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "actionType": r.get::<_, String>(1)?,
                "message": r.get::<_, String>(2)?,
                "performedBy": r.get::<_, String>(3)?,
                "entityId": r.get::<_, Option<String>>(4)?,
                "entityType": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
