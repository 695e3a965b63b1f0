//! Member directory: a read model of the profile system, used to validate specific
//! recipients and to resolve broadcast groups.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::db::models::{Member, Role};
use crate::db::{now_timestamp, timestamp_days_ago};
use crate::error::ChatResult;

/// Broadcast target group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GroupSelector {
    AllPsychologists,
    PsychologistsOnPlan { plan: String },
    AllPatients,
    /// Patients owning an archived conversation with no activity for `older_than_days`.
    PatientsWithArchivedConversations { older_than_days: u32 },
    Members { ids: Vec<String> },
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        role: row.get(1)?,
        display_name: row.get(2)?,
        plan: row.get(3)?,
    })
}

pub fn upsert_member(conn: &Connection, member: &Member) -> ChatResult<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO members (id, role, display_name, plan, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET
             role = excluded.role,
             display_name = excluded.display_name,
             plan = excluded.plan,
             updated_at = excluded.updated_at",
        params![member.id, member.role, member.display_name, member.plan, now],
    )?;
    Ok(())
}

pub fn get_member(conn: &Connection, id: &str) -> ChatResult<Option<Member>> {
    Ok(conn
        .query_row(
            "SELECT id, role, display_name, plan FROM members WHERE id = ?1",
            params![id],
            member_from_row,
        )
        .optional()?)
}

pub fn member_has_role(conn: &Connection, id: &str, role: Role) -> ChatResult<bool> {
    Ok(get_member(conn, id)?.is_some_and(|m| m.role == role))
}

/// Resolved broadcast group. Ids from an explicit list that are not in the directory
/// (or are administrators) land in `unresolved`.
#[derive(Debug, Default)]
pub struct ResolvedGroup {
    pub members: Vec<Member>,
    pub unresolved: Vec<String>,
}

pub fn resolve_group(conn: &Connection, selector: &GroupSelector) -> ChatResult<ResolvedGroup> {
    let members = match selector {
        GroupSelector::AllPsychologists => query_members(
            conn,
            "SELECT id, role, display_name, plan FROM members WHERE role = 'psychologist' ORDER BY id",
            params![],
        )?,
        GroupSelector::PsychologistsOnPlan { plan } => query_members(
            conn,
            "SELECT id, role, display_name, plan FROM members
             WHERE role = 'psychologist' AND plan = ?1 ORDER BY id",
            params![plan],
        )?,
        GroupSelector::AllPatients => query_members(
            conn,
            "SELECT id, role, display_name, plan FROM members WHERE role = 'patient' ORDER BY id",
            params![],
        )?,
        GroupSelector::PatientsWithArchivedConversations { older_than_days } => query_members(
            conn,
            "SELECT DISTINCT mb.id, mb.role, mb.display_name, mb.plan FROM members mb
             JOIN conversations c ON c.patient_id = mb.id
             WHERE mb.role = 'patient' AND c.status = 'archived' AND c.updated_at < ?1
             ORDER BY mb.id",
            params![timestamp_days_ago(*older_than_days)?],
        )?,
        GroupSelector::Members { ids } => {
            let mut group = ResolvedGroup::default();
            for id in ids {
                match get_member(conn, id)? {
                    Some(member) if member.role != Role::Admin => group.members.push(member),
                    _ => group.unresolved.push(id.clone()),
                }
            }
            return Ok(group);
        }
    };

    Ok(ResolvedGroup {
        members,
        unresolved: Vec::new(),
    })
}

fn query_members(conn: &Connection, sql: &str, bind: impl rusqlite::Params) -> ChatResult<Vec<Member>> {
    let mut stmt = conn.prepare(sql)?;
    let members = stmt
        .query_map(bind, member_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}
