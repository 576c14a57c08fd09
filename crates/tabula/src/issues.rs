use crate::activity::{action_for, diff};
use crate::db::{Db, fmt_ts, issue_from_row, now, stored_precision};
use crate::error::TabulaError;
use crate::filter;
use crate::id::{ISSUE_PREFIX, next_id};
use crate::types::{
    ActivityAction, Board, Issue, IssueDetail, IssueFeed, IssueState, IssueUpdate, ListFilters,
    NewIssue, User,
};
use crate::validate;

/// Admins, the creator, and the current assignee may edit.
pub fn can_update(user: &User, issue: &Issue) -> bool {
    user.is_admin() || issue.created_by == user.id || issue.assigned_to == user.id
}

/// Admins and the creator may delete.
pub fn can_delete(user: &User, issue: &Issue) -> bool {
    user.is_admin() || issue.created_by == user.id
}

fn trimmed(update: &IssueUpdate) -> IssueUpdate {
    IssueUpdate {
        title: update.title.as_deref().map(|s| s.trim().to_string()),
        description: update.description.as_deref().map(|s| s.trim().to_string()),
        assigned_to: update.assigned_to.as_deref().map(|s| s.trim().to_string()),
        due_date: update.due_date.map(stored_precision),
        ..update.clone()
    }
}

impl Db {
    fn next_issue_id(&self) -> Result<String, TabulaError> {
        // Ids still referenced by the activity log count as taken.
        let ids: Vec<String> = self
            .conn
            .prepare("SELECT id FROM issues UNION SELECT issue_id FROM activity_logs")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(next_id(ISSUE_PREFIX, ids.iter().map(String::as_str)))
    }

    pub fn create_issue(&self, actor: &User, new: &NewIssue) -> Result<Issue, TabulaError> {
        let ts = now();
        let new = &NewIssue {
            due_date: stored_precision(new.due_date),
            ..new.clone()
        };
        validate::new_issue(new, ts)?;

        let assignee = new
            .assigned_to
            .as_deref()
            .map(str::trim)
            .unwrap_or(&actor.id)
            .to_string();
        self.get_user(&assignee)?;

        let tx = self.conn.unchecked_transaction()?;
        let id = self.next_issue_id()?;
        self.conn
            .execute(
                "INSERT INTO issues (id, title, description, state, created_at, updated_at, due_date,
                                     estimated_time, completed_time, assigned_to, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    id,
                    new.title.trim(),
                    new.description.trim(),
                    IssueState::New.as_str(),
                    fmt_ts(ts),
                    fmt_ts(new.due_date),
                    new.estimated_time,
                    new.completed_time,
                    assignee,
                    actor.id,
                ],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to create issue: {e}")))?;
        self.log_activity(actor, &id, ActivityAction::Created, Vec::new())?;
        tx.commit()?;

        tracing::info!(%id, actor = %actor.id, %assignee, "issue created");
        self.publish();
        self.get_issue(&id)
    }

    pub fn get_issue(&self, id: &str) -> Result<Issue, TabulaError> {
        self.conn
            .query_row(
                "SELECT * FROM issues WHERE id = ?1",
                rusqlite::params![id],
                issue_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TabulaError::NotFound(id.to_string()),
                other => TabulaError::Internal(format!("failed to get issue: {other}")),
            })
    }

    fn query_issues(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Issue>, TabulaError> {
        let mut stmt = self.conn.prepare(sql)?;
        let issues = stmt
            .query_map(params, issue_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    pub fn list_issues(&self) -> Result<Vec<Issue>, TabulaError> {
        self.query_issues("SELECT * FROM issues ORDER BY rowid", [])
    }

    pub fn issues_by_assignee(&self, user_id: &str) -> Result<Vec<Issue>, TabulaError> {
        self.query_issues(
            "SELECT * FROM issues WHERE assigned_to = ?1 ORDER BY rowid",
            rusqlite::params![user_id],
        )
    }

    pub fn issues_by_creator(&self, user_id: &str) -> Result<Vec<Issue>, TabulaError> {
        self.query_issues(
            "SELECT * FROM issues WHERE created_by = ?1 ORDER BY rowid",
            rusqlite::params![user_id],
        )
    }

    pub fn update_issue(
        &self,
        actor: &User,
        id: &str,
        update: &IssueUpdate,
    ) -> Result<Issue, TabulaError> {
        let old = self.get_issue(id)?;
        if !can_update(actor, &old) {
            tracing::warn!(%id, actor = %actor.id, "update denied");
            return Err(TabulaError::PermissionDenied(
                "You do not have permission to update this issue".to_string(),
            ));
        }

        let update = trimmed(update);
        validate::issue_update(&update)?;
        if let Some(assignee) = &update.assigned_to {
            self.get_user(assignee)?;
        }

        let changes = diff(&old, &update);
        let next = Issue {
            title: update.title.clone().unwrap_or(old.title.clone()),
            description: update.description.clone().unwrap_or(old.description.clone()),
            state: update.state.unwrap_or(old.state),
            estimated_time: update.estimated_time.unwrap_or(old.estimated_time),
            completed_time: update.completed_time.unwrap_or(old.completed_time),
            due_date: update.due_date.unwrap_or(old.due_date),
            assigned_to: update
                .assigned_to
                .clone()
                .unwrap_or(old.assigned_to.clone()),
            updated_at: now(),
            ..old
        };

        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute(
                "UPDATE issues SET title = ?1, description = ?2, state = ?3, estimated_time = ?4,
                                   completed_time = ?5, due_date = ?6, assigned_to = ?7, updated_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    next.title,
                    next.description,
                    next.state.as_str(),
                    next.estimated_time,
                    next.completed_time,
                    fmt_ts(next.due_date),
                    next.assigned_to,
                    fmt_ts(next.updated_at),
                    id,
                ],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to update issue: {e}")))?;

        if !changes.is_empty() {
            let action = action_for(&changes);
            let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
            tracing::info!(%id, actor = %actor.id, action = action.as_str(), ?fields, "issue updated");
            self.log_activity(actor, id, action, changes)?;
        }
        tx.commit()?;

        self.publish();
        self.get_issue(id)
    }

    pub fn delete_issue(&self, actor: &User, id: &str) -> Result<(), TabulaError> {
        let issue = self.get_issue(id)?;
        if !can_delete(actor, &issue) {
            tracing::warn!(%id, actor = %actor.id, "delete denied");
            return Err(TabulaError::PermissionDenied(
                "You do not have permission to delete this issue".to_string(),
            ));
        }

        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute("DELETE FROM issues WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| TabulaError::Internal(format!("failed to delete issue: {e}")))?;
        self.log_activity(actor, id, ActivityAction::Deleted, Vec::new())?;
        tx.commit()?;

        tracing::info!(%id, actor = %actor.id, "issue deleted");
        self.publish();
        Ok(())
    }

    pub fn assign_issue(
        &self,
        actor: &User,
        id: &str,
        user_id: &str,
    ) -> Result<Issue, TabulaError> {
        if !actor.is_admin() && user_id != actor.id {
            tracing::warn!(%id, actor = %actor.id, target = user_id, "assign denied");
            return Err(TabulaError::PermissionDenied(
                "Only admins can assign issues to other users".to_string(),
            ));
        }
        let update = IssueUpdate {
            assigned_to: Some(user_id.to_string()),
            ..Default::default()
        };
        self.update_issue(actor, id, &update)
    }

    /// Marks the issue completed and books the estimate as time spent.
    pub fn complete_issue(&self, actor: &User, id: &str) -> Result<Issue, TabulaError> {
        let issue = self.get_issue(id)?;
        let update = IssueUpdate {
            state: Some(IssueState::Completed),
            completed_time: Some(issue.estimated_time),
            ..Default::default()
        };
        self.update_issue(actor, id, &update)
    }

    pub fn search_issues(&self, term: &str) -> Result<Vec<Issue>, TabulaError> {
        let users = self.list_users()?;
        let term = term.trim().to_lowercase();
        Ok(self
            .list_issues()?
            .into_iter()
            .filter(|i| filter::matches_search(i, &users, &term))
            .collect())
    }

    pub fn filtered_issues(
        &self,
        viewer: &User,
        filters: &ListFilters,
    ) -> Result<Vec<Issue>, TabulaError> {
        let users = self.list_users()?;
        let issues = self.list_issues()?;
        Ok(filter::apply(&issues, &users, filters, viewer))
    }

    pub fn board(&self, viewer: &User, filters: &ListFilters) -> Result<Board, TabulaError> {
        let issues = self.filtered_issues(viewer, filters)?;
        let summary = filter::summary(&issues);
        Ok(Board {
            columns: filter::board(issues),
            summary,
        })
    }

    pub fn issue_detail(&self, id: &str) -> Result<IssueDetail, TabulaError> {
        let issue = self.get_issue(id)?;
        let users = self.list_users()?;
        let activity = self.activity_for(id)?;
        Ok(filter::detail(issue, &users, activity, now()))
    }

    pub fn feed(&self) -> Result<IssueFeed, TabulaError> {
        Ok(IssueFeed {
            revision: self.revision(),
            issues: self.list_issues()?,
        })
    }
}
