//! Pure list views over issue snapshots: search, filtering, board columns, detail.

use chrono::{DateTime, Utc};

use crate::types::{
    ActivityLog, BoardColumns, BoardSummary, Issue, IssueDetail, IssueState, ListFilters, User,
};

pub fn name_of(users: &[User], id: &str) -> Option<String> {
    users.iter().find(|u| u.id == id).map(User::full_name)
}

/// `term` must already be lowercased. An empty term matches everything.
pub fn matches_search(issue: &Issue, users: &[User], term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let assignee = name_of(users, &issue.assigned_to)
        .map(|n| n.to_lowercase())
        .unwrap_or_default();
    issue.id.to_lowercase().contains(term)
        || issue.title.to_lowercase().contains(term)
        || assignee.contains(term)
}

pub fn apply(issues: &[Issue], users: &[User], filters: &ListFilters, viewer: &User) -> Vec<Issue> {
    let term = filters
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();

    issues
        .iter()
        .filter(|i| {
            if filters.restricted && !viewer.is_admin() && i.assigned_to != viewer.id {
                return false;
            }
            if !filters.states.is_empty() && !filters.states.contains(&i.state) {
                return false;
            }
            if !filters.assignees.is_empty() && !filters.assignees.contains(&i.assigned_to) {
                return false;
            }
            if filters.mine_only && i.assigned_to != viewer.id {
                return false;
            }
            matches_search(i, users, &term)
        })
        .cloned()
        .collect()
}

pub fn board(issues: Vec<Issue>) -> BoardColumns {
    let mut columns = BoardColumns::default();
    for issue in issues {
        match issue.state {
            IssueState::New => columns.new.push(issue),
            IssueState::InProgress => columns.in_progress.push(issue),
            IssueState::Blocked => columns.blocked.push(issue),
            IssueState::Completed => columns.completed.push(issue),
        }
    }
    columns
}

pub fn summary(issues: &[Issue]) -> BoardSummary {
    let count = |state: IssueState| issues.iter().filter(|i| i.state == state).count();
    BoardSummary {
        total: issues.len(),
        in_progress: count(IssueState::InProgress),
        completed: count(IssueState::Completed),
        blocked: count(IssueState::Blocked),
    }
}

pub fn detail(
    issue: Issue,
    users: &[User],
    activity: Vec<ActivityLog>,
    now: DateTime<Utc>,
) -> IssueDetail {
    let unknown = || "Unknown".to_string();
    IssueDetail {
        assignee_name: name_of(users, &issue.assigned_to).unwrap_or_else(unknown),
        creator_name: name_of(users, &issue.created_by).unwrap_or_else(unknown),
        delay: issue.delay(),
        overdue: issue.is_overdue(now),
        activity,
        issue,
    }
}
