use uuid::Uuid;

pub const ISSUE_PREFIX: &str = "ISS";
pub const USER_PREFIX: &str = "USR";
pub const LOG_PREFIX: &str = "LOG";

/// Numeric suffix of a `PREFIX-NNN` id, if it has one.
pub fn sequence_of(id: &str) -> Option<u32> {
    id.split('-').nth(1)?.parse().ok()
}

/// One past the highest sequence among `existing`; ids that don't parse are ignored.
pub fn next_id<'a, I>(prefix: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter_map(sequence_of)
        .max()
        .unwrap_or(0);
    format!("{prefix}-{:03}", max + 1)
}

pub fn session_token() -> String {
    Uuid::now_v7().simple().to_string()
}
