use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use roundtable_core::validate;

use crate::audit;
use crate::error::StoreError;
use crate::row_helpers;
use crate::table::{now_utc, Roundtable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    Admin,
    Lead,
    Coder,
    Reviewer,
    Designer,
    Tester,
}

impl Role {
    /// Admin and lead override otherwise ownership-gated operations.
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Admin | Self::Lead)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Admin => write!(f, "admin"),
            Self::Lead => write!(f, "lead"),
            Self::Coder => write!(f, "coder"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::Designer => write!(f, "designer"),
            Self::Tester => write!(f, "tester"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            "lead" => Ok(Self::Lead),
            "coder" => Ok(Self::Coder),
            "reviewer" => Ok(Self::Reviewer),
            "designer" => Ok(Self::Designer),
            "tester" => Ok(Self::Tester),
            other => Err(format!(
                "unknown role: {other}, must be one of: admin, agent, coder, designer, lead, reviewer, tester"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for MemberStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown member status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberRow {
    pub name: String,
    pub role: Role,
    pub capabilities: Vec<String>,
    pub status: MemberStatus,
    pub registered_at: String,
    pub last_heartbeat: String,
}

impl Roundtable {
    /// Join (or rejoin) the table. Re-registering an existing name refreshes
    /// role, capabilities, and heartbeat and reactivates the member; the
    /// original registration time is preserved. At most one row per name.
    #[instrument(skip(self, capabilities), fields(name, role = %role))]
    pub fn register(
        &self,
        name: &str,
        role: Role,
        capabilities: &[String],
    ) -> Result<MemberRow, StoreError> {
        validate::agent_name(name)?;
        validate::capabilities(capabilities)?;
        let caps = serde_json::to_string(capabilities)?;
        let now = now_utc();

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO members (name, role, capabilities, status, registered_at, last_heartbeat)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     role = excluded.role,
                     capabilities = excluded.capabilities,
                     status = 'active',
                     last_heartbeat = excluded.last_heartbeat",
                rusqlite::params![name, role.to_string(), caps, now, now],
            )?;
            audit::record(
                tx,
                name,
                "register",
                Some("member"),
                Some(name),
                serde_json::json!({ "role": role }),
            )?;

            get_member(tx, name)?.ok_or_else(|| {
                StoreError::Database(format!("member {name} missing after upsert"))
            })
        })
    }

    /// Leave the table: soft-deactivation, never a hard delete.
    /// Returns false (and writes no audit entry) for unknown names.
    #[instrument(skip(self), fields(name))]
    pub fn deregister(&self, name: &str) -> Result<bool, StoreError> {
        self.db.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE members SET status = 'inactive' WHERE name = ?1",
                [name],
            )?;
            if changed > 0 {
                audit::record(
                    tx,
                    name,
                    "deregister",
                    Some("member"),
                    Some(name),
                    serde_json::json!({}),
                )?;
            }
            Ok(changed > 0)
        })
    }

    /// Refresh the last-seen timestamp. Inactive members are not resurrected.
    #[instrument(skip(self), fields(name))]
    pub fn heartbeat(&self, name: &str) -> Result<bool, StoreError> {
        let now = now_utc();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE members SET last_heartbeat = ?1 WHERE name = ?2 AND status = 'active'",
                rusqlite::params![now, name],
            )?;
            Ok(changed > 0)
        })
    }

    /// Everyone at the table, active members only by default.
    #[instrument(skip(self))]
    pub fn list_members(&self, include_inactive: bool) -> Result<Vec<MemberRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = if include_inactive {
                "SELECT name, role, capabilities, status, registered_at, last_heartbeat
                 FROM members ORDER BY name"
            } else {
                "SELECT name, role, capabilities, status, registered_at, last_heartbeat
                 FROM members WHERE status = 'active' ORDER BY name"
            };
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_member(row)?);
            }
            Ok(results)
        })
    }

    /// Role of an active member; None for unknown or inactive names.
    /// This is the primitive behind every privileged-role check.
    pub fn member_role(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.db.with_conn(|conn| role_of(conn, name))
    }
}

pub(crate) fn role_of(conn: &Connection, name: &str) -> Result<Option<Role>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT role FROM members WHERE name = ?1 AND status = 'active'",
            [name],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::from(other)),
        })?;
    raw.map(|r| row_helpers::parse_enum(&r, "members", "role"))
        .transpose()
}

pub(crate) fn is_privileged(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    Ok(role_of(conn, name)?.is_some_and(Role::is_privileged))
}

pub(crate) fn get_member(conn: &Connection, name: &str) -> Result<Option<MemberRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name, role, capabilities, status, registered_at, last_heartbeat
         FROM members WHERE name = ?1",
    )?;
    let mut rows = stmt.query([name])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_member(row)?)),
        None => Ok(None),
    }
}

fn row_to_member(row: &rusqlite::Row<'_>) -> Result<MemberRow, StoreError> {
    let role_str: String = row_helpers::get(row, 1, "members", "role")?;
    let caps_str: String = row_helpers::get(row, 2, "members", "capabilities")?;
    let status_str: String = row_helpers::get(row, 3, "members", "status")?;

    Ok(MemberRow {
        name: row_helpers::get(row, 0, "members", "name")?,
        role: row_helpers::parse_enum(&role_str, "members", "role")?,
        capabilities: row_helpers::parse_string_list(&caps_str, "members", "capabilities")?,
        status: row_helpers::parse_enum(&status_str, "members", "status")?,
        registered_at: row_helpers::get(row, 4, "members", "registered_at")?,
        last_heartbeat: row_helpers::get(row, 5, "members", "last_heartbeat")?,
    })
}
