use std::fmt;

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_CATEGORY: &str = "N/A";
pub const DEFAULT_DATE: &str = "N/A";
pub const DEFAULT_NOTE: &str = "None";
pub const DEFAULT_SUBMITTER: &str = "Anonymous";

/// Display fields for one PTO request, every one already resolved to a value
/// or its default.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFields {
    pub title: String,
    pub category: String,
    pub start: String,
    pub end: String,
    pub note: String,
    pub submitter: String,
}

impl Default for NotificationFields {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            start: DEFAULT_DATE.to_string(),
            end: DEFAULT_DATE.to_string(),
            note: DEFAULT_NOTE.to_string(),
            submitter: DEFAULT_SUBMITTER.to_string(),
        }
    }
}

impl NotificationFields {
    /// Slack mrkdwn body posted to the channel.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NotificationFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "📌 *New PTO Request!*")?;
        writeln!(f, "*Respondent:* {}", self.submitter)?;
        writeln!(f, "*Title:* {}", self.title)?;
        writeln!(f, "*Type:* {}", self.category)?;
        writeln!(f, "*Dates:* {} → {}", self.start, self.end)?;
        write!(f, "*Notes:* {}", self.note)
    }
}
