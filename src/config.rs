use chrono::{DateTime, Utc};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub notion: NotionConfig,
    pub slack: SlackConfig,
    pub app: AppConfig,
    pub labels: FieldLabels,
}

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub api_url: String,
    pub api_version: String,
    pub token: String,
    pub database_id: String,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub api_url: String,
    pub bot_token: String,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub poll_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub watermark_file: PathBuf,
    pub notify_since: Option<DateTime<Utc>>,
}

/// Property names the extractor looks for. Matching is a case-insensitive
/// substring test, so "PTO Request Title (v2)" still matches "PTO Request Title".
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLabels {
    pub title: String,
    pub category: String,
    pub date: String,
    pub start_date: String,
    pub end_date: String,
    pub note: String,
    pub submitter: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values are
    /// treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let defaults = FieldLabels::default();

        Ok(Config {
            notion: NotionConfig {
                api_url: get("NOTION_API_URL")
                    .unwrap_or_else(|| "https://api.notion.com/v1".to_string()),
                api_version: get("NOTION_VERSION").unwrap_or_else(|| "2022-06-28".to_string()),
                token: required("NOTION_TOKEN")?,
                database_id: required("NOTION_DATABASE_ID")?,
                webhook_secret: get("NOTION_WEBHOOK_SECRET"),
            },

            slack: SlackConfig {
                api_url: get("SLACK_API_URL").unwrap_or_else(|| "https://slack.com/api".to_string()),
                bot_token: required("SLACK_BOT_TOKEN")?,
                channel_id: required("SLACK_CHANNEL_ID")?,
            },

            app: AppConfig {
                port: parse_or("PORT", get("PORT"), 10000)?,
                poll_interval_secs: parse_or("POLL_INTERVAL_SECS", get("POLL_INTERVAL_SECS"), 30)?,
                http_timeout_secs: parse_or("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"), 15)?,
                watermark_file: get("WATERMARK_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("last_seen.txt")),
                notify_since: get("NOTIFY_SINCE")
                    .map(|value| parse_timestamp("NOTIFY_SINCE", value))
                    .transpose()?,
            },

            labels: FieldLabels {
                title: get("TITLE_LABEL").unwrap_or(defaults.title),
                category: get("TYPE_LABEL").unwrap_or(defaults.category),
                date: get("DATE_LABEL").unwrap_or(defaults.date),
                start_date: defaults.start_date,
                end_date: defaults.end_date,
                note: get("NOTES_LABEL").unwrap_or(defaults.note),
                submitter: get("SUBMITTER_LABEL").unwrap_or(defaults.submitter),
            },
        })
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            poll_interval_secs: 30,
            http_timeout_secs: 15,
            watermark_file: PathBuf::from("last_seen.txt"),
            notify_since: None,
        }
    }
}

impl Default for FieldLabels {
    fn default() -> Self {
        Self {
            title: "PTO Request Title".to_string(),
            category: "PTO Type".to_string(),
            date: "PTO Date".to_string(),
            start_date: "Start Date".to_string(),
            end_date: "End Date".to_string(),
            note: "Additional Notes".to_string(),
            submitter: "Respondent".to_string(),
        }
    }
}

fn parse_or<T>(var: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_timestamp(var: &str, value: String) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConfigError::Invalid {
            var: var.to_string(),
            value,
            reason: e.to_string(),
        })
}
