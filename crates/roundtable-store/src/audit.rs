use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use roundtable_core::validate;

use crate::error::StoreError;
use crate::row_helpers;
use crate::table::{now_utc, Roundtable};

/// One audit trail entry. `details` is the raw JSON text as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub agent_name: String,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub details: String,
}

/// Filters for querying the audit trail. Results are newest-first.
#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub agent_name: Option<String>,
    pub action: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

/// Append an audit entry on the caller's connection. Mutating operations
/// call this inside their own transaction so the entry commits or rolls
/// back together with the effect it records.
pub(crate) fn record(
    conn: &Connection,
    agent: &str,
    action: &str,
    target_type: Option<&str>,
    target_id: Option<&str>,
    details: serde_json::Value,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO audit_log (timestamp, agent_name, action, target_type, target_id, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            now_utc(),
            agent,
            action,
            target_type,
            target_id,
            details.to_string(),
        ],
    )?;
    Ok(())
}

impl Roundtable {
    /// Append a free-form audit entry in its own transaction.
    #[instrument(skip(self, details), fields(agent, action))]
    pub fn log_action(
        &self,
        agent: &str,
        action: &str,
        target_type: Option<&str>,
        target_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        validate::agent_name(agent)?;
        self.db
            .with_tx(|tx| record(tx, agent, action, target_type, target_id, details))
    }

    /// Query the audit trail, newest first. The limit defaults to 50 and is
    /// capped at 200.
    #[instrument(skip(self, query))]
    pub fn get_audit_log(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        if let Some(since) = &query.since {
            validate::iso_date(since)?;
        }

        self.db.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, timestamp, agent_name, action, target_type, target_id, details
                 FROM audit_log WHERE 1=1",
            );
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(agent) = &query.agent_name {
                sql.push_str(&format!(" AND agent_name = ?{}", params.len() + 1));
                params.push(Box::new(agent.clone()));
            }
            if let Some(action) = &query.action {
                sql.push_str(&format!(" AND action = ?{}", params.len() + 1));
                params.push(Box::new(action.clone()));
            }
            if let Some(since) = &query.since {
                sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
                params.push(Box::new(since.clone()));
            }

            sql.push_str(" ORDER BY id DESC");
            let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
            sql.push_str(&format!(" LIMIT {limit}"));

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_entry(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<AuditEntry, StoreError> {
    Ok(AuditEntry {
        id: row_helpers::get(row, 0, "audit_log", "id")?,
        timestamp: row_helpers::get(row, 1, "audit_log", "timestamp")?,
        agent_name: row_helpers::get(row, 2, "audit_log", "agent_name")?,
        action: row_helpers::get(row, 3, "audit_log", "action")?,
        target_type: row_helpers::get_opt(row, 4, "audit_log", "target_type")?,
        target_id: row_helpers::get_opt(row, 5, "audit_log", "target_id")?,
        details: row_helpers::get(row, 6, "audit_log", "details")?,
    })
}
