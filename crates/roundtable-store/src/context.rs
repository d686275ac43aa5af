use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use roundtable_core::validate;

use crate::audit;
use crate::error::StoreError;
use crate::row_helpers;
use crate::table::{now_utc, Roundtable};

/// One shared-context entry. Values are opaque strings; last writer wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextRow {
    pub key: String,
    pub value: String,
    pub set_by: String,
    pub updated_at: String,
}

impl Roundtable {
    /// Publish a key/value pair, replacing any previous value.
    #[instrument(skip(self, value), fields(key, set_by))]
    pub fn share_context(
        &self,
        key: &str,
        value: &str,
        set_by: &str,
    ) -> Result<ContextRow, StoreError> {
        validate::context_key(key)?;
        validate::context_value(value)?;
        validate::agent_name(set_by)?;

        let now = now_utc();
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO shared_context (key, value, set_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     set_by = excluded.set_by,
                     updated_at = excluded.updated_at",
                rusqlite::params![key, value, set_by, now],
            )?;
            audit::record(
                tx,
                set_by,
                "share_context",
                Some("context"),
                Some(key),
                json!({}),
            )?;
            Ok(ContextRow {
                key: key.to_string(),
                value: value.to_string(),
                set_by: set_by.to_string(),
                updated_at: now.clone(),
            })
        })
    }

    /// Look up one entry by key.
    #[instrument(skip(self), fields(key))]
    pub fn context_get(&self, key: &str) -> Result<Option<ContextRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, set_by, updated_at FROM shared_context WHERE key = ?1",
            )?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_context(row)?)),
                None => Ok(None),
            }
        })
    }

    /// The full shared-context set, ordered by key.
    #[instrument(skip(self))]
    pub fn context_all(&self) -> Result<Vec<ContextRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, set_by, updated_at FROM shared_context ORDER BY key",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_context(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_context(row: &rusqlite::Row<'_>) -> Result<ContextRow, StoreError> {
    Ok(ContextRow {
        key: row_helpers::get(row, 0, "shared_context", "key")?,
        value: row_helpers::get(row, 1, "shared_context", "value")?,
        set_by: row_helpers::get(row, 2, "shared_context", "set_by")?,
        updated_at: row_helpers::get(row, 3, "shared_context", "updated_at")?,
    })
}
