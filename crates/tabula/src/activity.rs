//! Field-level diffing and the append-only activity log.

use serde::Serialize;
use serde_json::Value;

use crate::db::{Db, fmt_ts, log_from_row, now};
use crate::error::TabulaError;
use crate::id::{LOG_PREFIX, next_id};
use crate::types::{ActivityAction, ActivityLog, Change, Issue, IssueUpdate, User};

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn push_if_changed<T: PartialEq + Serialize>(
    changes: &mut Vec<Change>,
    field: &str,
    old: &T,
    new: Option<&T>,
) {
    if let Some(new) = new
        && new != old
    {
        changes.push(Change {
            field: field.to_string(),
            old_value: to_json(old),
            new_value: to_json(new),
        });
    }
}

/// Changes an update would make to `old`. Fields the update leaves out, and
/// fields set to their current value, produce nothing.
pub fn diff(old: &Issue, update: &IssueUpdate) -> Vec<Change> {
    let mut changes = Vec::new();
    push_if_changed(&mut changes, "title", &old.title, update.title.as_ref());
    push_if_changed(
        &mut changes,
        "description",
        &old.description,
        update.description.as_ref(),
    );
    push_if_changed(&mut changes, "state", &old.state, update.state.as_ref());
    push_if_changed(
        &mut changes,
        "estimated_time",
        &old.estimated_time,
        update.estimated_time.as_ref(),
    );
    push_if_changed(
        &mut changes,
        "completed_time",
        &old.completed_time,
        update.completed_time.as_ref(),
    );
    push_if_changed(
        &mut changes,
        "due_date",
        &old.due_date,
        update.due_date.as_ref(),
    );
    push_if_changed(
        &mut changes,
        "assigned_to",
        &old.assigned_to,
        update.assigned_to.as_ref(),
    );
    changes
}

pub fn action_for(changes: &[Change]) -> ActivityAction {
    if changes.iter().any(|c| c.field == "state") {
        ActivityAction::StateChanged
    } else {
        ActivityAction::Updated
    }
}

impl Db {
    fn next_log_id(&self) -> Result<String, TabulaError> {
        let ids: Vec<String> = self
            .conn
            .prepare("SELECT id FROM activity_logs")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(next_id(LOG_PREFIX, ids.iter().map(String::as_str)))
    }

    pub(crate) fn log_activity(
        &self,
        actor: &User,
        issue_id: &str,
        action: ActivityAction,
        changes: Vec<Change>,
    ) -> Result<ActivityLog, TabulaError> {
        let entry = ActivityLog {
            id: self.next_log_id()?,
            issue_id: issue_id.to_string(),
            user_id: actor.id.clone(),
            user_name: actor.full_name(),
            action,
            changes,
            timestamp: now(),
        };
        let changes_json = serde_json::to_string(&entry.changes)
            .map_err(|e| TabulaError::Internal(format!("failed to encode changes: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO activity_logs (id, issue_id, user_id, user_name, action, changes, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    entry.id,
                    entry.issue_id,
                    entry.user_id,
                    entry.user_name,
                    entry.action.as_str(),
                    changes_json,
                    fmt_ts(entry.timestamp),
                ],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to log activity: {e}")))?;

        tracing::debug!(
            id = %entry.id,
            issue = %entry.issue_id,
            action = entry.action.as_str(),
            changes = entry.changes.len(),
            "activity logged"
        );
        Ok(entry)
    }

    /// Entries for an issue, newest first. Works for deleted issues too.
    pub fn activity_for(&self, issue_id: &str) -> Result<Vec<ActivityLog>, TabulaError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM activity_logs WHERE issue_id = ?1 ORDER BY timestamp DESC, rowid DESC",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![issue_id], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueState;
    use chrono::{Duration, Utc};

    fn issue() -> Issue {
        let now = Utc::now();
        Issue {
            id: "ISS-001".into(),
            title: "fix login redirect".into(),
            description: "users land on a blank page".into(),
            state: IssueState::New,
            created_at: now,
            updated_at: now,
            due_date: now + Duration::days(3),
            estimated_time: 4,
            completed_time: 0,
            assigned_to: "USR-002".into(),
            created_by: "USR-001".into(),
        }
    }

    #[test]
    fn empty_update_has_no_changes() {
        assert!(diff(&issue(), &IssueUpdate::default()).is_empty());
    }

    #[test]
    fn unchanged_values_are_ignored() {
        let old = issue();
        let update = IssueUpdate {
            title: Some(old.title.clone()),
            state: Some(old.state),
            due_date: Some(old.due_date),
            ..Default::default()
        };
        assert!(diff(&old, &update).is_empty());
    }

    #[test]
    fn records_old_and_new_values() {
        let old = issue();
        let update = IssueUpdate {
            state: Some(IssueState::Blocked),
            estimated_time: Some(6),
            assigned_to: Some("USR-003".into()),
            ..Default::default()
        };
        let changes = diff(&old, &update);
        assert_eq!(changes.len(), 3);

        assert_eq!(changes[0].field, "state");
        assert_eq!(changes[0].old_value, "new");
        assert_eq!(changes[0].new_value, "blocked");

        assert_eq!(changes[1].field, "estimated_time");
        assert_eq!(changes[1].old_value, 4);
        assert_eq!(changes[1].new_value, 6);

        assert_eq!(changes[2].field, "assigned_to");
        assert_eq!(changes[2].old_value, "USR-002");
        assert_eq!(changes[2].new_value, "USR-003");
    }

    #[test]
    fn state_change_wins_action() {
        let old = issue();
        let both = IssueUpdate {
            title: Some("fix login redirect loop".into()),
            state: Some(IssueState::InProgress),
            ..Default::default()
        };
        assert_eq!(action_for(&diff(&old, &both)), ActivityAction::StateChanged);

        let title_only = IssueUpdate {
            title: Some("fix login redirect loop".into()),
            ..Default::default()
        };
        assert_eq!(action_for(&diff(&old, &title_only)), ActivityAction::Updated);
    }
}
