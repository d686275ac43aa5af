use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use roundtable_core::{validate, Event, EventKind};

use crate::audit;
use crate::error::StoreError;
use crate::members;
use crate::row_helpers;
use crate::table::{now_utc, Roundtable};

/// Reserved recipient meaning "every active member". Read and archive state
/// for wildcard messages is tracked per-agent in broadcast_reads, never on
/// the message row itself.
pub const WILDCARD: &str = "*";

pub const PREVIEW_LIMIT: u32 = 3;
const PREVIEW_CONTENT_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub created_at: String,
    pub read: bool,
    pub archived_at: Option<String>,
}

/// Truncated unread message, for badge-style previews.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub sender: String,
    pub content: String,
    pub created_at: String,
}

/// Outcome of delete_message / archive_message. Authorization failures are
/// data, not errors; absence is reported distinctly.
#[derive(Clone, Debug, PartialEq)]
pub enum ArchiveOutcome {
    Archived(MessageRow),
    NotFound,
    NotAuthorized,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PurgeOutcome {
    Purged { count: u64 },
    NotAuthorized,
}

// Shared unread predicate: addressed to the agent directly or via wildcard,
// not archived, not read (row flag for direct, broadcast_reads for wildcard).
const UNREAD_WHERE: &str = "(recipient = ?1 OR recipient = '*')
    AND read = 0
    AND archived_at IS NULL
    AND NOT EXISTS (
        SELECT 1 FROM broadcast_reads br
        WHERE br.message_id = messages.id AND br.agent_name = ?1
    )";

impl Roundtable {
    /// Send a direct message. Rate-limited per sender.
    #[instrument(skip(self, content), fields(sender, recipient))]
    pub fn send_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        validate::agent_name(sender)?;
        validate::agent_name(recipient)?;
        validate::message_content(content)?;
        self.limiter.check(sender)?;

        let row = self.insert_message(sender, recipient, content, "send_message")?;
        self.notify.notify(
            recipient,
            Event::new(
                EventKind::Message,
                json!({ "id": row.id, "sender": sender, "content": content }),
            ),
        );
        Ok(row)
    }

    /// Send a message to every active member.
    #[instrument(skip(self, content), fields(sender))]
    pub fn broadcast(&self, sender: &str, content: &str) -> Result<MessageRow, StoreError> {
        validate::agent_name(sender)?;
        validate::message_content(content)?;
        self.limiter.check(sender)?;

        let row = self.insert_message(sender, WILDCARD, content, "broadcast")?;
        self.notify.notify_all(
            Event::new(
                EventKind::Broadcast,
                json!({ "id": row.id, "sender": sender, "content": content }),
            ),
            Some(sender),
        );
        Ok(row)
    }

    fn insert_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        action: &str,
    ) -> Result<MessageRow, StoreError> {
        let now = now_utc();
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (sender, recipient, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender, recipient, content, now],
            )?;
            let id = tx.last_insert_rowid();
            audit::record(
                tx,
                sender,
                action,
                Some("message"),
                Some(&id.to_string()),
                json!({ "recipient": recipient }),
            )?;
            Ok(MessageRow {
                id,
                sender: sender.to_string(),
                recipient: recipient.to_string(),
                content: content.to_string(),
                created_at: now.clone(),
                read: false,
                archived_at: None,
            })
        })
    }

    /// Fetch the agent's inbox, oldest first. Returned direct messages are
    /// marked read and returned wildcard messages get a broadcast_reads row,
    /// all inside the same transaction. Rows report their pre-fetch state.
    #[instrument(skip(self), fields(agent, include_read, include_archived))]
    pub fn get_messages(
        &self,
        agent: &str,
        include_read: bool,
        include_archived: bool,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_tx(|tx| {
            let mut sql = String::from(
                "SELECT id, sender, recipient, content, created_at, read, archived_at
                 FROM messages WHERE (recipient = ?1 OR recipient = '*')",
            );
            if !include_archived {
                sql.push_str(" AND archived_at IS NULL");
            }
            if !include_read {
                sql.push_str(
                    " AND read = 0 AND NOT EXISTS (
                         SELECT 1 FROM broadcast_reads br
                         WHERE br.message_id = messages.id AND br.agent_name = ?1
                     )",
                );
            }
            sql.push_str(" ORDER BY created_at, id");

            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query([agent])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }

            for message in &messages {
                if message.recipient == WILDCARD {
                    tx.execute(
                        "INSERT OR IGNORE INTO broadcast_reads (agent_name, message_id) VALUES (?1, ?2)",
                        rusqlite::params![agent, message.id],
                    )?;
                } else if !message.read {
                    tx.execute("UPDATE messages SET read = 1 WHERE id = ?1", [message.id])?;
                }
            }

            Ok(messages)
        })
    }

    /// Unread message count; never marks anything read.
    #[instrument(skip(self), fields(agent))]
    pub fn unread_count(&self, agent: &str) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM messages WHERE {UNREAD_WHERE}"),
                [agent],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Newest unread messages with truncated content; never marks read.
    #[instrument(skip(self), fields(agent, limit))]
    pub fn unread_preview(
        &self,
        agent: &str,
        limit: u32,
    ) -> Result<Vec<MessagePreview>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT sender, content, created_at FROM messages WHERE {UNREAD_WHERE}
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![agent, limit])?;
            let mut previews = Vec::new();
            while let Some(row) = rows.next()? {
                let content: String = row_helpers::get(row, 1, "messages", "content")?;
                previews.push(MessagePreview {
                    sender: row_helpers::get(row, 0, "messages", "sender")?,
                    content: content.chars().take(PREVIEW_CONTENT_CHARS).collect(),
                    created_at: row_helpers::get(row, 2, "messages", "created_at")?,
                });
            }
            Ok(previews)
        })
    }

    /// Soft-delete a message (archived_at set, read flag untouched).
    #[instrument(skip(self), fields(message_id, agent))]
    pub fn delete_message(
        &self,
        message_id: i64,
        agent: &str,
    ) -> Result<ArchiveOutcome, StoreError> {
        self.archive_inner(message_id, agent, false, "delete_message")
    }

    /// Archive a message: soft-delete plus mark read. For wildcard messages
    /// the read mark is the acting agent's broadcast_reads row.
    #[instrument(skip(self), fields(message_id, agent))]
    pub fn archive_message(
        &self,
        message_id: i64,
        agent: &str,
    ) -> Result<ArchiveOutcome, StoreError> {
        self.archive_inner(message_id, agent, true, "archive_message")
    }

    fn archive_inner(
        &self,
        message_id: i64,
        agent: &str,
        mark_read: bool,
        action: &str,
    ) -> Result<ArchiveOutcome, StoreError> {
        self.db.with_tx(|tx| {
            let mut message = match get_message(tx, message_id)? {
                Some(m) => m,
                None => return Ok(ArchiveOutcome::NotFound),
            };
            if !may_touch(tx, &message, agent)? {
                return Ok(ArchiveOutcome::NotAuthorized);
            }

            let now = now_utc();
            if mark_read {
                tx.execute(
                    "UPDATE messages SET archived_at = ?1, read = 1 WHERE id = ?2",
                    rusqlite::params![now, message_id],
                )?;
                if message.recipient == WILDCARD {
                    tx.execute(
                        "INSERT OR IGNORE INTO broadcast_reads (agent_name, message_id) VALUES (?1, ?2)",
                        rusqlite::params![agent, message_id],
                    )?;
                }
                message.read = true;
            } else {
                tx.execute(
                    "UPDATE messages SET archived_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, message_id],
                )?;
            }
            message.archived_at = Some(now);

            audit::record(
                tx,
                agent,
                action,
                Some("message"),
                Some(&message_id.to_string()),
                json!({}),
            )?;
            Ok(ArchiveOutcome::Archived(message))
        })
    }

    /// Bulk-archive the agent's active direct messages, optionally scoped to
    /// older-than and sender filters. Returns the number archived.
    #[instrument(skip(self), fields(agent))]
    pub fn clear_inbox(
        &self,
        agent: &str,
        before_date: Option<&str>,
        sender: Option<&str>,
    ) -> Result<u64, StoreError> {
        validate::agent_name(agent)?;
        if let Some(date) = before_date {
            validate::iso_date(date)?;
        }

        let now = now_utc();
        self.db.with_tx(|tx| {
            let mut sql = String::from(
                "UPDATE messages SET archived_at = ?1, read = 1
                 WHERE recipient = ?2 AND archived_at IS NULL",
            );
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(now.clone()), Box::new(agent.to_string())];

            if let Some(date) = before_date {
                sql.push_str(&format!(" AND created_at < ?{}", params.len() + 1));
                params.push(Box::new(date.to_string()));
            }
            if let Some(from) = sender {
                sql.push_str(&format!(" AND sender = ?{}", params.len() + 1));
                params.push(Box::new(from.to_string()));
            }

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let archived = tx.execute(&sql, param_refs.as_slice())?;

            audit::record(
                tx,
                agent,
                "clear_inbox",
                None,
                None,
                json!({ "archived": archived }),
            )?;
            Ok(archived as u64)
        })
    }

    /// Hard-delete every message older than `before_date`, dependent
    /// broadcast_reads rows first. Requires the acting agent to currently
    /// hold admin or lead; unauthorized attempts mutate nothing.
    #[instrument(skip(self), fields(agent, before_date))]
    pub fn purge_messages(
        &self,
        agent: &str,
        before_date: &str,
    ) -> Result<PurgeOutcome, StoreError> {
        validate::agent_name(agent)?;
        validate::iso_date(before_date)?;

        self.db.with_tx(|tx| {
            if !members::is_privileged(tx, agent)? {
                return Ok(PurgeOutcome::NotAuthorized);
            }

            tx.execute(
                "DELETE FROM broadcast_reads WHERE message_id IN
                 (SELECT id FROM messages WHERE created_at < ?1)",
                [before_date],
            )?;
            let purged = tx.execute("DELETE FROM messages WHERE created_at < ?1", [before_date])?;

            audit::record(
                tx,
                agent,
                "purge_messages",
                None,
                None,
                json!({ "purged": purged, "before": before_date }),
            )?;
            Ok(PurgeOutcome::Purged {
                count: purged as u64,
            })
        })
    }
}

/// Sender, direct recipient, anyone for a wildcard message, or a privileged
/// role may archive/delete.
fn may_touch(conn: &Connection, message: &MessageRow, agent: &str) -> Result<bool, StoreError> {
    if message.sender == agent || message.recipient == agent || message.recipient == WILDCARD {
        return Ok(true);
    }
    members::is_privileged(conn, agent)
}

fn get_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, recipient, content, created_at, read, archived_at
         FROM messages WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_message(row)?)),
        None => Ok(None),
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let read: i64 = row_helpers::get(row, 5, "messages", "read")?;
    Ok(MessageRow {
        id: row_helpers::get(row, 0, "messages", "id")?,
        sender: row_helpers::get(row, 1, "messages", "sender")?,
        recipient: row_helpers::get(row, 2, "messages", "recipient")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        created_at: row_helpers::get(row, 4, "messages", "created_at")?,
        read: read != 0,
        archived_at: row_helpers::get_opt(row, 6, "messages", "archived_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;
    use crate::members::Role;

    fn setup() -> Roundtable {
        let table = Roundtable::in_memory().unwrap();
        table.register("alice", Role::Agent, &[]).unwrap();
        table.register("bob", Role::Agent, &[]).unwrap();
        table
    }

    /// Insert a message with a fixed timestamp, bypassing the access layer.
    fn insert_backdated(table: &Roundtable, sender: &str, recipient: &str, created_at: &str) {
        table
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (sender, recipient, content, created_at) VALUES (?1, ?2, 'old msg', ?3)",
                    rusqlite::params![sender, recipient, created_at],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn send_and_receive() {
        let table = setup();
        table.send_message("alice", "bob", "hello bob").unwrap();

        let messages = table.get_messages("bob", false, false).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].content, "hello bob");
        assert!(!messages[0].read);
    }

    #[test]
    fn fetch_marks_direct_read() {
        let table = setup();
        table.send_message("alice", "bob", "hello").unwrap();
        table.get_messages("bob", false, false).unwrap();

        assert!(table.get_messages("bob", false, false).unwrap().is_empty());
        let all = table.get_messages("bob", true, false).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].read);
    }

    #[test]
    fn empty_content_rejected() {
        let table = setup();
        let result = table.send_message("alice", "bob", "");
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn oversized_content_rejected() {
        let table = setup();
        let result = table.send_message("alice", "bob", &"x".repeat(20_000));
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn broadcast_visible_to_all() {
        let table = setup();
        table.register("charlie", Role::Agent, &[]).unwrap();
        table.broadcast("alice", "announcement").unwrap();

        let bob = table.get_messages("bob", false, false).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].recipient, WILDCARD);
        assert_eq!(table.get_messages("charlie", false, false).unwrap().len(), 1);
    }

    #[test]
    fn broadcast_read_tracked_per_agent() {
        let table = setup();
        table.register("charlie", Role::Agent, &[]).unwrap();
        table.broadcast("alice", "hello all").unwrap();

        table.get_messages("bob", false, false).unwrap();
        assert_eq!(table.unread_count("bob").unwrap(), 0);
        assert_eq!(table.unread_count("charlie").unwrap(), 1);
    }

    #[test]
    fn broadcast_unread_count_resets_per_message() {
        let table = setup();
        table.broadcast("alice", "first").unwrap();
        table.get_messages("bob", false, false).unwrap();
        assert_eq!(table.unread_count("bob").unwrap(), 0);

        table.broadcast("alice", "second").unwrap();
        assert_eq!(table.unread_count("bob").unwrap(), 1);
    }

    #[test]
    fn include_read_shows_consumed_broadcasts() {
        let table = setup();
        table.broadcast("alice", "msg1").unwrap();
        table.get_messages("bob", false, false).unwrap();
        table.broadcast("alice", "msg2").unwrap();

        let all = table.get_messages("bob", true, false).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn rereading_is_idempotent() {
        let table = setup();
        table.broadcast("alice", "once").unwrap();
        table.send_message("alice", "bob", "direct").unwrap();

        table.get_messages("bob", true, false).unwrap();
        let again = table.get_messages("bob", true, false).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(table.unread_count("bob").unwrap(), 0);
    }

    #[test]
    fn messages_ordered_oldest_first() {
        let table = setup();
        insert_backdated(&table, "alice", "bob", "2020-01-01T00:00:00+00:00");
        table.send_message("alice", "bob", "newer").unwrap();

        let messages = table.get_messages("bob", true, false).unwrap();
        assert_eq!(messages[0].content, "old msg");
        assert_eq!(messages[1].content, "newer");
    }

    #[test]
    fn unread_preview_truncates_and_orders() {
        let table = setup();
        table.send_message("alice", "bob", &"x".repeat(500)).unwrap();
        table.send_message("alice", "bob", "short").unwrap();

        let previews = table.unread_preview("bob", PREVIEW_LIMIT).unwrap();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].content, "short");
        assert_eq!(previews[1].content.chars().count(), 100);

        // Preview never marks anything read
        assert_eq!(table.unread_count("bob").unwrap(), 2);
    }

    #[test]
    fn rate_limit_enforced_per_sender() {
        let table = setup();
        for i in 0..30 {
            table.send_message("alice", "bob", &format!("msg {i}")).unwrap();
        }
        let err = table.send_message("alice", "bob", "one too many").unwrap_err();
        assert!(matches!(err, StoreError::RateLimited { .. }));
        assert!(err.to_string().contains("Rate limit exceeded"));

        // A different sender is unaffected in the same window
        table.send_message("bob", "alice", "hello from bob").unwrap();
    }

    #[test]
    fn broadcast_shares_the_sender_window() {
        let table = setup();
        for i in 0..30 {
            table.broadcast("alice", &format!("spam {i}")).unwrap();
        }
        assert!(matches!(
            table.broadcast("alice", "one too many"),
            Err(StoreError::RateLimited { .. })
        ));
    }

    #[test]
    fn reset_rate_limits_restores_sending() {
        let table = setup();
        for i in 0..30 {
            table.send_message("alice", "bob", &format!("msg {i}")).unwrap();
        }
        assert!(table.send_message("alice", "bob", "blocked").is_err());

        table.reset_rate_limits();
        table.send_message("alice", "bob", "fresh start").unwrap();
    }

    #[test]
    fn delete_by_sender() {
        let table = setup();
        let msg = table.send_message("alice", "bob", "hello").unwrap();

        let outcome = table.delete_message(msg.id, "alice").unwrap();
        let ArchiveOutcome::Archived(archived) = outcome else {
            panic!("expected Archived, got {outcome:?}");
        };
        assert!(archived.archived_at.is_some());
        assert!(!archived.read);
        assert!(table.get_messages("bob", false, false).unwrap().is_empty());
    }

    #[test]
    fn delete_by_recipient() {
        let table = setup();
        let msg = table.send_message("alice", "bob", "hello").unwrap();
        let outcome = table.delete_message(msg.id, "bob").unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
    }

    #[test]
    fn delete_not_found() {
        let table = setup();
        assert_eq!(
            table.delete_message(999, "alice").unwrap(),
            ArchiveOutcome::NotFound
        );
    }

    #[test]
    fn delete_unauthorized_third_party() {
        let table = setup();
        table.register("charlie", Role::Agent, &[]).unwrap();
        let msg = table.send_message("alice", "bob", "hello").unwrap();

        assert_eq!(
            table.delete_message(msg.id, "charlie").unwrap(),
            ArchiveOutcome::NotAuthorized
        );
        assert_eq!(table.get_messages("bob", false, false).unwrap().len(), 1);
    }

    #[test]
    fn privileged_roles_override_delete() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();
        table.register("lead1", Role::Lead, &[]).unwrap();

        let m1 = table.send_message("alice", "bob", "one").unwrap();
        let m2 = table.send_message("alice", "bob", "two").unwrap();

        assert!(matches!(
            table.delete_message(m1.id, "admin1").unwrap(),
            ArchiveOutcome::Archived(_)
        ));
        assert!(matches!(
            table.delete_message(m2.id, "lead1").unwrap(),
            ArchiveOutcome::Archived(_)
        ));
    }

    #[test]
    fn deregistered_admin_loses_override() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();
        table.deregister("admin1").unwrap();

        let msg = table.send_message("alice", "bob", "hello").unwrap();
        assert_eq!(
            table.delete_message(msg.id, "admin1").unwrap(),
            ArchiveOutcome::NotAuthorized
        );
    }

    #[test]
    fn archive_marks_read() {
        let table = setup();
        let msg = table.send_message("alice", "bob", "hello").unwrap();

        let outcome = table.archive_message(msg.id, "bob").unwrap();
        let ArchiveOutcome::Archived(archived) = outcome else {
            panic!("expected Archived, got {outcome:?}");
        };
        assert!(archived.read);
        assert!(archived.archived_at.is_some());
        assert_eq!(table.unread_count("bob").unwrap(), 0);
    }

    #[test]
    fn archive_broadcast_records_reader() {
        let table = setup();
        let msg = table.broadcast("alice", "hello all").unwrap();

        let outcome = table.archive_message(msg.id, "bob").unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
        assert!(table.get_messages("bob", false, false).unwrap().is_empty());
    }

    #[test]
    fn archived_messages_hidden_by_default() {
        let table = setup();
        table.send_message("alice", "bob", "visible").unwrap();
        let msg = table.send_message("alice", "bob", "archived").unwrap();
        table.archive_message(msg.id, "bob").unwrap();

        let default_view = table.get_messages("bob", true, false).unwrap();
        assert_eq!(default_view.len(), 1);
        assert_eq!(default_view[0].content, "visible");

        let with_archived = table.get_messages("bob", true, true).unwrap();
        assert_eq!(with_archived.len(), 2);
        assert_eq!(
            with_archived.iter().filter(|m| m.archived_at.is_some()).count(),
            1
        );
    }

    #[test]
    fn unread_count_and_preview_exclude_archived() {
        let table = setup();
        table.send_message("alice", "bob", "keep").unwrap();
        let msg = table.send_message("alice", "bob", "archive me").unwrap();
        table.archive_message(msg.id, "bob").unwrap();

        assert_eq!(table.unread_count("bob").unwrap(), 1);
        let previews = table.unread_preview("bob", PREVIEW_LIMIT).unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].content, "keep");
    }

    #[test]
    fn clear_inbox_all() {
        let table = setup();
        for i in 0..3 {
            table.send_message("alice", "bob", &format!("msg {i}")).unwrap();
        }

        assert_eq!(table.clear_inbox("bob", None, None).unwrap(), 3);
        assert!(table.get_messages("bob", false, false).unwrap().is_empty());
    }

    #[test]
    fn clear_inbox_before_date() {
        let table = setup();
        insert_backdated(&table, "alice", "bob", "2020-01-01T00:00:00+00:00");
        table.send_message("alice", "bob", "new msg").unwrap();

        let archived = table
            .clear_inbox("bob", Some("2025-01-01T00:00:00+00:00"), None)
            .unwrap();
        assert_eq!(archived, 1);

        let remaining = table.get_messages("bob", false, false).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "new msg");
    }

    #[test]
    fn clear_inbox_sender_filter() {
        let table = setup();
        table.register("charlie", Role::Agent, &[]).unwrap();
        table.send_message("alice", "bob", "from alice").unwrap();
        table.send_message("charlie", "bob", "from charlie").unwrap();

        assert_eq!(table.clear_inbox("bob", None, Some("alice")).unwrap(), 1);
        let remaining = table.get_messages("bob", false, false).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sender, "charlie");
    }

    #[test]
    fn clear_inbox_conjunctive_filters() {
        let table = setup();
        table.register("charlie", Role::Agent, &[]).unwrap();
        insert_backdated(&table, "alice", "bob", "2020-01-01T00:00:00+00:00");
        table.send_message("alice", "bob", "new from alice").unwrap();
        table.send_message("charlie", "bob", "from charlie").unwrap();

        let archived = table
            .clear_inbox("bob", Some("2025-01-01T00:00:00+00:00"), Some("alice"))
            .unwrap();
        assert_eq!(archived, 1);
        assert_eq!(table.get_messages("bob", true, false).unwrap().len(), 2);
    }

    #[test]
    fn clear_inbox_empty_returns_zero() {
        let table = setup();
        assert_eq!(table.clear_inbox("bob", None, None).unwrap(), 0);
    }

    #[test]
    fn clear_inbox_invalid_date_rejected() {
        let table = setup();
        let result = table.clear_inbox("bob", Some("2025-13-45"), None);
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn purge_requires_privileged_role() {
        let table = setup();
        table.send_message("bob", "alice", "hello").unwrap();

        let outcome = table
            .purge_messages("alice", "9999-01-01T00:00:00+00:00")
            .unwrap();
        assert_eq!(outcome, PurgeOutcome::NotAuthorized);
        assert_eq!(table.get_messages("alice", true, false).unwrap().len(), 1);
    }

    #[test]
    fn purge_hard_deletes() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();
        table.send_message("bob", "alice", "hello").unwrap();

        let outcome = table
            .purge_messages("admin1", "9999-01-01T00:00:00+00:00")
            .unwrap();
        assert_eq!(outcome, PurgeOutcome::Purged { count: 1 });

        // Gone even from an archived-inclusive fetch
        assert!(table.get_messages("alice", true, true).unwrap().is_empty());
    }

    #[test]
    fn purge_allows_lead() {
        let table = setup();
        table.register("lead1", Role::Lead, &[]).unwrap();
        table.send_message("bob", "alice", "hello").unwrap();

        let outcome = table
            .purge_messages("lead1", "9999-01-01T00:00:00+00:00")
            .unwrap();
        assert_eq!(outcome, PurgeOutcome::Purged { count: 1 });
    }

    #[test]
    fn purge_removes_broadcast_reads() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();
        table.broadcast("bob", "hello all").unwrap();
        table.get_messages("alice", false, false).unwrap();

        let outcome = table
            .purge_messages("admin1", "9999-01-01T00:00:00+00:00")
            .unwrap();
        assert_eq!(outcome, PurgeOutcome::Purged { count: 1 });

        let orphans: i64 = table
            .database()
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM broadcast_reads", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn purge_invalid_date_rejected() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();
        let result = table.purge_messages("admin1", "not-a-date");
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn messaging_actions_audited() {
        let table = setup();
        table.register("admin1", Role::Admin, &[]).unwrap();

        let direct = table.send_message("alice", "bob", "hello").unwrap();
        let bcast = table.broadcast("alice", "hello all").unwrap();
        table.delete_message(direct.id, "alice").unwrap();
        table.archive_message(bcast.id, "bob").unwrap();
        table.clear_inbox("bob", None, None).unwrap();
        table
            .purge_messages("admin1", "9999-01-01T00:00:00+00:00")
            .unwrap();

        let actions: std::collections::HashSet<String> = table
            .get_audit_log(&AuditQuery {
                limit: Some(200),
                ..Default::default()
            })
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        for expected in [
            "send_message",
            "broadcast",
            "delete_message",
            "archive_message",
            "clear_inbox",
            "purge_messages",
        ] {
            assert!(actions.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn send_audit_records_recipient() {
        let table = setup();
        table.send_message("alice", "bob", "hi").unwrap();

        let logs = table
            .get_audit_log(&AuditQuery {
                agent_name: Some("alice".into()),
                action: Some("send_message".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].details.contains("bob"), "got: {}", logs[0].details);
    }
}
