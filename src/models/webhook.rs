use serde::Deserialize;

pub const PAGE_CREATED: &str = "page.created";

/// Inbound Notion webhook body. Accepts both the current shape
/// (`type` + `entity`) and the older one (`event` + `resource`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub entity: Option<WebhookEntity>,
    #[serde(default)]
    pub resource: Option<WebhookEntity>,
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEntity {
    #[serde(default)]
    pub id: Option<String>,
}

impl WebhookPayload {
    pub fn kind(&self) -> Option<&str> {
        self.event_type.as_deref().or(self.event.as_deref())
    }

    pub fn record_id(&self) -> Option<&str> {
        self.entity
            .as_ref()
            .and_then(|e| e.id.as_deref())
            .or_else(|| self.resource.as_ref().and_then(|r| r.id.as_deref()))
    }

    /// Record id to fetch, if this event announces a newly created page.
    pub fn created_record_id(&self) -> Option<&str> {
        if self.kind() == Some(PAGE_CREATED) {
            self.record_id()
        } else {
            None
        }
    }
}
