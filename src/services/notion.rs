use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::NotionConfig;
use crate::models::record::{QueryResponse, Record};

const PAGE_SIZE: u32 = 100;

/// Where PTO records come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every record currently in the database, in no guaranteed order.
    async fn fetch_records(&self) -> Result<Vec<Record>>;

    /// A single record by id.
    async fn fetch_record(&self, id: &str) -> Result<Record>;
}

#[derive(Clone)]
pub struct NotionService {
    client: Client,
    config: NotionConfig,
}

impl NotionService {
    pub fn new(config: NotionConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn query_url(&self) -> String {
        format!(
            "{}/databases/{}/query",
            self.config.api_url.trim_end_matches('/'),
            self.config.database_id
        )
    }

    fn page_url(&self, id: &str) -> String {
        format!("{}/pages/{}", self.config.api_url.trim_end_matches('/'), id)
    }

    /// Request body for one page of the database query.
    pub fn query_body(start_cursor: Option<&str>) -> Value {
        let mut body = json!({
            "page_size": PAGE_SIZE,
            "sorts": [{ "timestamp": "created_time", "direction": "ascending" }]
        });
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = json!(cursor);
        }
        body
    }

    async fn query_page(&self, start_cursor: Option<&str>) -> Result<QueryResponse> {
        let response = self
            .client
            .post(self.query_url())
            .bearer_auth(&self.config.token)
            .header("Notion-Version", &self.config.api_version)
            .json(&Self::query_body(start_cursor))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Notion query failed ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }
}

/// Decodes the raw `results` array, skipping entries that lack an id or a
/// valid creation time.
pub fn decode_results(results: Vec<Value>) -> Vec<Record> {
    results
        .into_iter()
        .filter_map(|raw| {
            let id = raw.get("id").and_then(Value::as_str).map(str::to_string);
            let record = Record::from_value(raw);
            if record.is_none() {
                log::warn!("Skipping undecodable record {:?}", id);
            }
            record
        })
        .collect()
}

#[async_trait]
impl RecordSource for NotionService {
    async fn fetch_records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.query_page(cursor.as_deref()).await?;
            records.extend(decode_results(page.results));

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        log::debug!(
            "Fetched {} records from database {}",
            records.len(),
            self.config.database_id
        );
        Ok(records)
    }

    async fn fetch_record(&self, id: &str) -> Result<Record> {
        let response = self
            .client
            .get(self.page_url(id))
            .bearer_auth(&self.config.token)
            .header("Notion-Version", &self.config.api_version)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Notion page fetch failed ({}): {}", status, error_text));
        }

        let page: Value = response.json().await?;
        Record::from_value(page).ok_or_else(|| anyhow!("Page {} has no usable id or created_time", id))
    }
}
