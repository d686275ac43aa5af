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

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!(
                "unknown task status: {other}, must be one of: blocked, done, in_progress, pending"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!(
                "unknown priority: {other}, must be one of: high, low, medium"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub creator: String,
    pub assignee: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Acting principal for task updates. The system principal is the trusted
/// front-end path and bypasses ownership checks; agent identities are
/// checked against creator, assignee, and privileged roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actor<'a> {
    Agent(&'a str),
    System,
}

/// Outcome of a claim attempt. Absence, a lost race, and missing authority
/// are distinct results callers must branch on.
#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    Claimed(TaskRow),
    NotFound,
    NotPending { status: TaskStatus },
    NotAuthorized { assignee: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    Updated(TaskRow),
    NotFound,
    NotAuthorized,
}

impl Roundtable {
    /// Post a task to the board, initially pending.
    #[instrument(skip(self, description), fields(title, creator, assignee, priority = %priority))]
    pub fn create_task(
        &self,
        title: &str,
        creator: &str,
        description: &str,
        assignee: Option<&str>,
        priority: TaskPriority,
    ) -> Result<TaskRow, StoreError> {
        validate::task_title(title)?;
        validate::agent_name(creator)?;
        validate::task_description(description)?;
        if let Some(name) = assignee {
            validate::agent_name(name)?;
        }

        let now = now_utc();
        let task = self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO tasks (title, description, status, priority, creator, assignee, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![title, description, priority.to_string(), creator, assignee, now, now],
            )?;
            let id = tx.last_insert_rowid();
            audit::record(
                tx,
                creator,
                "create_task",
                Some("task"),
                Some(&id.to_string()),
                json!({ "title": title, "assignee": assignee }),
            )?;
            Ok(TaskRow {
                id,
                title: title.to_string(),
                description: description.to_string(),
                status: TaskStatus::Pending,
                priority,
                creator: creator.to_string(),
                assignee: assignee.map(str::to_string),
                result: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
        })?;

        let event = Event::new(
            EventKind::TaskAssigned,
            json!({
                "id": task.id,
                "title": title,
                "creator": creator,
                "assignee": assignee,
                "priority": priority,
            }),
        );
        match assignee {
            Some(name) => self.notify.notify(name, event),
            None => self.notify.notify_all(event, Some(creator)),
        }
        Ok(task)
    }

    /// Board view with conjunctive status/assignee filters, oldest first.
    #[instrument(skip(self))]
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
    ) -> Result<Vec<TaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, title, description, status, priority, creator, assignee, result,
                        created_at, updated_at
                 FROM tasks WHERE 1=1",
            );
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(status) = status {
                sql.push_str(&format!(" AND status = ?{}", params.len() + 1));
                params.push(Box::new(status.to_string()));
            }
            if let Some(assignee) = assignee {
                sql.push_str(&format!(" AND assignee = ?{}", params.len() + 1));
                params.push(Box::new(assignee.to_string()));
            }
            sql.push_str(" ORDER BY created_at, id");

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_task(row)?);
            }
            Ok(results)
        })
    }

    /// Atomically claim a pending task. The conditional update only succeeds
    /// while the task is still pending, so of two concurrent claimants
    /// exactly one wins; the loser sees zero affected rows and gets
    /// `NotPending`.
    #[instrument(skip(self), fields(task_id, agent))]
    pub fn claim_task(&self, task_id: i64, agent: &str) -> Result<ClaimOutcome, StoreError> {
        validate::agent_name(agent)?;

        let outcome = self.db.with_tx(|tx| {
            let mut task = match get_task(tx, task_id)? {
                Some(task) => task,
                None => return Ok(ClaimOutcome::NotFound),
            };
            if task.status != TaskStatus::Pending {
                return Ok(ClaimOutcome::NotPending {
                    status: task.status,
                });
            }
            // A pre-assigned task may only be claimed by its assignee or a
            // privileged agent (who takes it over).
            if let Some(assignee) = task.assignee.clone() {
                if assignee != agent && !members::is_privileged(tx, agent)? {
                    return Ok(ClaimOutcome::NotAuthorized { assignee });
                }
            }

            let now = now_utc();
            let changed = tx.execute(
                "UPDATE tasks SET assignee = ?1, status = 'in_progress', updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                rusqlite::params![agent, now, task_id],
            )?;
            if changed == 0 {
                // Lost the race between the read above and the update.
                return match get_task(tx, task_id)? {
                    Some(task) => Ok(ClaimOutcome::NotPending {
                        status: task.status,
                    }),
                    None => Ok(ClaimOutcome::NotFound),
                };
            }

            audit::record(
                tx,
                agent,
                "claim_task",
                Some("task"),
                Some(&task_id.to_string()),
                json!({}),
            )?;
            task.assignee = Some(agent.to_string());
            task.status = TaskStatus::InProgress;
            task.updated_at = now;
            Ok(ClaimOutcome::Claimed(task))
        })?;

        if let ClaimOutcome::Claimed(task) = &outcome {
            self.notify.notify_all(
                Event::new(
                    EventKind::TaskUpdated,
                    json!({ "id": task.id, "status": task.status, "assignee": agent }),
                ),
                Some(agent),
            );
        }
        Ok(outcome)
    }

    /// Set a task's status and optionally its result. Authorized for the
    /// creator, the current assignee, privileged roles, or the system
    /// principal. No status is terminal.
    #[instrument(skip(self, result), fields(task_id, actor = ?actor, status = %status))]
    pub fn update_task(
        &self,
        task_id: i64,
        actor: Actor<'_>,
        status: TaskStatus,
        result: Option<&str>,
    ) -> Result<UpdateOutcome, StoreError> {
        if let Actor::Agent(name) = actor {
            validate::agent_name(name)?;
        }
        if let Some(text) = result {
            validate::task_result(text)?;
        }

        let outcome = self.db.with_tx(|tx| {
            let mut task = match get_task(tx, task_id)? {
                Some(task) => task,
                None => return Ok(UpdateOutcome::NotFound),
            };
            if let Actor::Agent(name) = actor {
                let allowed = task.creator == name
                    || task.assignee.as_deref() == Some(name)
                    || members::is_privileged(tx, name)?;
                if !allowed {
                    return Ok(UpdateOutcome::NotAuthorized);
                }
            }

            let now = now_utc();
            match result {
                Some(text) => tx.execute(
                    "UPDATE tasks SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![status.to_string(), text, now, task_id],
                )?,
                None => tx.execute(
                    "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status.to_string(), now, task_id],
                )?,
            };

            let actor_name = match actor {
                Actor::Agent(name) => name,
                Actor::System => "system",
            };
            audit::record(
                tx,
                actor_name,
                "update_task",
                Some("task"),
                Some(&task_id.to_string()),
                json!({ "status": status }),
            )?;
            task.status = status;
            if let Some(text) = result {
                task.result = Some(text.to_string());
            }
            task.updated_at = now;
            Ok(UpdateOutcome::Updated(task))
        })?;

        if let UpdateOutcome::Updated(task) = &outcome {
            let exclude = match actor {
                Actor::Agent(name) => Some(name),
                Actor::System => None,
            };
            self.notify.notify_all(
                Event::new(
                    EventKind::TaskUpdated,
                    json!({ "id": task.id, "status": task.status }),
                ),
                exclude,
            );
        }
        Ok(outcome)
    }
}

fn get_task(conn: &Connection, id: i64) -> Result<Option<TaskRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, status, priority, creator, assignee, result,
                created_at, updated_at
         FROM tasks WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_task(row)?)),
        None => Ok(None),
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<TaskRow, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "tasks", "status")?;
    let priority_str: String = row_helpers::get(row, 4, "tasks", "priority")?;

    Ok(TaskRow {
        id: row_helpers::get(row, 0, "tasks", "id")?,
        title: row_helpers::get(row, 1, "tasks", "title")?,
        description: row_helpers::get(row, 2, "tasks", "description")?,
        status: row_helpers::parse_enum(&status_str, "tasks", "status")?,
        priority: row_helpers::parse_enum(&priority_str, "tasks", "priority")?,
        creator: row_helpers::get(row, 5, "tasks", "creator")?,
        assignee: row_helpers::get_opt(row, 6, "tasks", "assignee")?,
        result: row_helpers::get_opt(row, 7, "tasks", "result")?,
        created_at: row_helpers::get(row, 8, "tasks", "created_at")?,
        updated_at: row_helpers::get(row, 9, "tasks", "updated_at")?,
    })
}
