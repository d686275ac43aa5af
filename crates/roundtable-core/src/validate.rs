use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

pub const MAX_AGENT_NAME_LEN: usize = 64;
pub const MAX_MESSAGE_CONTENT_LEN: usize = 10_000;
pub const MAX_TASK_TITLE_LEN: usize = 200;
pub const MAX_TASK_DESCRIPTION_LEN: usize = 5_000;
pub const MAX_TASK_RESULT_LEN: usize = 5_000;
pub const MAX_CONTEXT_KEY_LEN: usize = 128;
pub const MAX_CONTEXT_VALUE_LEN: usize = 50_000;
pub const MAX_CAPABILITIES: usize = 20;
pub const MAX_CAPABILITY_LEN: usize = 64;

// Alphanumeric plus hyphens, underscores, spaces, dots; must start and end
// alphanumeric. A single alphanumeric character is also valid.
static AGENT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9 _.\-]{0,62}[a-zA-Z0-9]$|^[a-zA-Z0-9]$")
        .expect("agent name regex")
});

/// Uniform validation failure carrying a human-readable message.
/// Raised before any store access; never leaves partial state behind.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub fn agent_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new("Agent name cannot be empty"));
    }
    let len = name.chars().count();
    if len > MAX_AGENT_NAME_LEN {
        return Err(ValidationError::new(format!(
            "Agent name too long ({len} chars, max {MAX_AGENT_NAME_LEN})"
        )));
    }
    if !AGENT_NAME_RE.is_match(name) {
        return Err(ValidationError::new(format!(
            "Invalid agent name: {name:?}. Must be alphanumeric with hyphens, \
             underscores, spaces, or dots. Must start and end with alphanumeric."
        )));
    }
    Ok(())
}

pub fn message_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new("Message content cannot be empty"));
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_CONTENT_LEN {
        return Err(ValidationError::new(format!(
            "Message too long ({len} chars, max {MAX_MESSAGE_CONTENT_LEN})"
        )));
    }
    Ok(())
}

pub fn task_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::new("Task title cannot be empty"));
    }
    let len = title.chars().count();
    if len > MAX_TASK_TITLE_LEN {
        return Err(ValidationError::new(format!(
            "Task title too long ({len} chars, max {MAX_TASK_TITLE_LEN})"
        )));
    }
    Ok(())
}

pub fn task_description(description: &str) -> Result<(), ValidationError> {
    let len = description.chars().count();
    if len > MAX_TASK_DESCRIPTION_LEN {
        return Err(ValidationError::new(format!(
            "Task description too long ({len} chars, max {MAX_TASK_DESCRIPTION_LEN})"
        )));
    }
    Ok(())
}

pub fn task_result(result: &str) -> Result<(), ValidationError> {
    let len = result.chars().count();
    if len > MAX_TASK_RESULT_LEN {
        return Err(ValidationError::new(format!(
            "Task result too long ({len} chars, max {MAX_TASK_RESULT_LEN})"
        )));
    }
    Ok(())
}

pub fn capabilities(caps: &[String]) -> Result<(), ValidationError> {
    if caps.len() > MAX_CAPABILITIES {
        return Err(ValidationError::new(format!(
            "Too many capabilities ({}, max {MAX_CAPABILITIES})",
            caps.len()
        )));
    }
    for cap in caps {
        let len = cap.chars().count();
        if len > MAX_CAPABILITY_LEN {
            return Err(ValidationError::new(format!(
                "Capability too long: {cap:?} ({len} chars, max {MAX_CAPABILITY_LEN})"
            )));
        }
    }
    Ok(())
}

pub fn context_key(key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::new("Context key cannot be empty"));
    }
    let len = key.chars().count();
    if len > MAX_CONTEXT_KEY_LEN {
        return Err(ValidationError::new(format!(
            "Context key too long ({len} chars, max {MAX_CONTEXT_KEY_LEN})"
        )));
    }
    Ok(())
}

pub fn context_value(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > MAX_CONTEXT_VALUE_LEN {
        return Err(ValidationError::new(format!(
            "Context value too long ({len} chars, max {MAX_CONTEXT_VALUE_LEN})"
        )));
    }
    Ok(())
}

/// Accepts RFC 3339 datetimes, naive datetimes, and bare dates.
pub fn iso_date(date: &str) -> Result<(), ValidationError> {
    let parseable = DateTime::parse_from_rfc3339(date).is_ok()
        || date.parse::<NaiveDateTime>().is_ok()
        || date.parse::<NaiveDate>().is_ok();
    if !parseable {
        return Err(ValidationError::new(format!(
            "Invalid date format: {date:?}. Expected ISO 8601 format (e.g. 2025-01-15T00:00:00)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_agent_name_rejected() {
        assert!(agent_name("").is_err());
        assert!(agent_name("   ").is_err());
    }

    #[test]
    fn too_long_agent_name_rejected() {
        let err = agent_name(&"a".repeat(100)).unwrap_err();
        assert!(err.to_string().contains("too long"), "got: {err}");
    }

    #[test]
    fn sql_injection_name_rejected() {
        let err = agent_name("alice'; DROP TABLE members;--").unwrap_err();
        assert!(err.to_string().contains("Invalid agent name"), "got: {err}");
    }

    #[test]
    fn valid_agent_names_accepted() {
        assert!(agent_name("claude opus").is_ok());
        assert!(agent_name("claude-code").is_ok());
        assert!(agent_name("agent.v2").is_ok());
        assert!(agent_name("a_b").is_ok());
        assert!(agent_name("A").is_ok());
    }

    #[test]
    fn names_must_start_and_end_alphanumeric() {
        assert!(agent_name("-alice").is_err());
        assert!(agent_name("alice-").is_err());
        assert!(agent_name(".a.").is_err());
    }

    #[test]
    fn message_content_limits() {
        assert!(message_content("").is_err());
        assert!(message_content("  ").is_err());
        assert!(message_content("hello").is_ok());
        assert!(message_content(&"x".repeat(20_000)).is_err());
        assert!(message_content(&"x".repeat(10_000)).is_ok());
    }

    #[test]
    fn task_title_limits() {
        assert!(task_title("").is_err());
        assert!(task_title(&"x".repeat(300)).is_err());
        assert!(task_title("Fix bug").is_ok());
    }

    #[test]
    fn task_description_and_result_limits() {
        assert!(task_description("").is_ok());
        assert!(task_description(&"x".repeat(6_000)).is_err());
        assert!(task_result(&"x".repeat(6_000)).is_err());
        assert!(task_result("done").is_ok());
    }

    #[test]
    fn capabilities_limits() {
        let many: Vec<String> = (0..25).map(|_| "cap".to_string()).collect();
        assert!(capabilities(&many).is_err());
        assert!(capabilities(&["x".repeat(100)]).is_err());
        assert!(capabilities(&["rust".to_string(), "review".to_string()]).is_ok());
        assert!(capabilities(&[]).is_ok());
    }

    #[test]
    fn context_limits() {
        assert!(context_key("").is_err());
        assert!(context_key(&"k".repeat(200)).is_err());
        assert!(context_key("deploy.phase").is_ok());
        assert!(context_value(&"v".repeat(100_000)).is_err());
        assert!(context_value("").is_ok());
    }

    #[test]
    fn iso_date_parsing() {
        assert!(iso_date("2025-01-15T00:00:00").is_ok());
        assert!(iso_date("2025-01-15T00:00:00+00:00").is_ok());
        assert!(iso_date("2025-01-15").is_ok());
        assert!(iso_date("not-a-date").is_err());
        assert!(iso_date("2025-13-45").is_err());
    }

    #[test]
    fn validation_error_message_is_displayed() {
        let err = agent_name("").unwrap_err();
        assert_eq!(err.to_string(), "Agent name cannot be empty");
    }
}
