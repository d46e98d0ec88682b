use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::FieldLabels;
use crate::models::record::Record;
use crate::services::extractor::extract_fields;
use crate::services::notion::RecordSource;
use crate::services::slack::Notifier;
use crate::services::watermark::{Watermark, WatermarkStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub eligible: usize,
    pub sent: usize,
}

/// Fetches records, notifies the ones newer than the watermark, and advances
/// the watermark once everything up to a creation time is delivered. Sole
/// owner of the watermark store.
pub struct Poller<S, N, W> {
    source: S,
    notifier: N,
    store: W,
    labels: FieldLabels,
    watermark: Watermark,
    // Notified records the watermark does not cover yet: the rest of a
    // partially sent tie group, or pages sent ahead of the query by a webhook.
    sent_ahead: HashMap<String, DateTime<Utc>>,
}

impl<S, N, W> Poller<S, N, W>
where
    S: RecordSource,
    N: Notifier,
    W: WatermarkStore,
{
    /// Loads the persisted watermark. `seed` is only used when nothing has
    /// been persisted yet.
    pub fn new(
        source: S,
        notifier: N,
        store: W,
        labels: FieldLabels,
        seed: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let mut watermark = store.load()?;
        if watermark.is_empty() {
            if let Some(since) = seed {
                watermark = Watermark::at(since);
            }
        }

        Ok(Self {
            source,
            notifier,
            store,
            labels,
            watermark,
            sent_ahead: HashMap::new(),
        })
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn store(&self) -> &W {
        &self.store
    }

    /// Records still to notify, oldest first. Ties on creation time are
    /// ordered by id.
    pub fn eligible(&self, records: Vec<Record>) -> Vec<Record> {
        let mut eligible: Vec<Record> = records
            .into_iter()
            .filter(|r| self.is_pending(r))
            .collect();
        eligible.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        eligible
    }

    fn is_pending(&self, record: &Record) -> bool {
        record.is_live()
            && self.watermark.admits(&record.created_time)
            && !self.sent_ahead.contains_key(&record.id)
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let records = self.source.fetch_records().await?;
        self.process(records).await
    }

    /// Cycle started by a webhook. Runs a normal cycle, then sends the
    /// announced page directly if the query does not show it yet. A page sent
    /// that way never moves the watermark, since older pages may still be
    /// missing from the query.
    pub async fn run_triggered_cycle(&mut self, record_id: &str) -> Result<CycleReport> {
        let records = self.source.fetch_records().await?;
        let visible = records.iter().any(|r| r.id == record_id);
        let mut report = self.process(records).await?;

        if visible {
            return Ok(report);
        }

        let record = match self.source.fetch_record(record_id).await {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Could not fetch triggered record {}: {:#}", record_id, e);
                return Ok(report);
            }
        };

        if self.is_pending(&record) {
            report.eligible += 1;
            self.notify(&record).await?;
            report.sent += 1;
        }
        Ok(report)
    }

    async fn notify(&mut self, record: &Record) -> Result<()> {
        let fields = extract_fields(record, &self.labels);
        self.notifier
            .send(&fields.message())
            .await
            .map_err(|e| e.context(format!("Failed to notify record {}", record.id)))?;

        log::info!("✅ Notified record {} created {}", record.id, record.created_time);
        self.sent_ahead.insert(record.id.clone(), record.created_time);
        Ok(())
    }

    async fn advance_to(&mut self, created_time: DateTime<Utc>) {
        if !self.watermark.admits(&created_time) {
            return;
        }
        self.watermark.advance(created_time);

        let watermark = self.watermark;
        self.sent_ahead.retain(|_, created| watermark.admits(created));

        if let Err(e) = self.store.save(&self.watermark).await {
            log::error!("❌ Failed to persist watermark {}: {:#}", self.watermark, e);
        }
    }

    async fn process(&mut self, records: Vec<Record>) -> Result<CycleReport> {
        let fetched = records.len();
        let visible: HashSet<String> = records
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.id.clone())
            .collect();
        let eligible = self.eligible(records);
        let mut report = CycleReport {
            fetched,
            eligible: eligible.len(),
            sent: 0,
        };

        log::debug!(
            "Fetched {} records, {} newer than watermark {:?}",
            report.fetched,
            report.eligible,
            self.watermark.to_string()
        );

        for (index, record) in eligible.iter().enumerate() {
            // Stop at the first failure; the watermark stays below the unsent record.
            self.notify(record).await.map_err(|e| {
                e.context(format!(
                    "{} of {} sent this cycle",
                    report.sent, report.eligible
                ))
            })?;
            report.sent += 1;

            // Only move past a creation time once its whole tie group is out.
            let group_done = eligible
                .get(index + 1)
                .map_or(true, |next| next.created_time > record.created_time);
            if group_done {
                self.advance_to(record.created_time).await;
            }
        }

        // Every visible record above the watermark is now delivered, so the
        // watermark may cover pages that were sent ahead and have since shown up.
        let caught_up = self
            .sent_ahead
            .iter()
            .filter(|(id, _)| visible.contains(id.as_str()))
            .map(|(_, created)| *created)
            .max();
        if let Some(created_time) = caught_up {
            self.advance_to(created_time).await;
        }

        Ok(report)
    }

    /// Runs until the process exits. The interval is measured from the end of
    /// each cycle, so cycles never overlap. A record id arriving on `triggers`
    /// cuts the wait short.
    pub async fn run(mut self, interval: Duration, triggers: mpsc::Receiver<String>) {
        log::info!(
            "✅ Poller running every {:?}, watermark {:?}",
            interval,
            self.watermark.to_string()
        );

        let mut triggers = Some(triggers);
        let mut pending: Option<String> = None;

        loop {
            let result = match pending.take() {
                Some(id) => self.run_triggered_cycle(&id).await,
                None => self.run_cycle().await,
            };

            match result {
                Ok(report) if report.sent > 0 => log::info!(
                    "Cycle sent {} of {} new records ({} fetched)",
                    report.sent,
                    report.eligible,
                    report.fetched
                ),
                Ok(_) => {}
                Err(e) => log::error!("⚠️ Error during polling: {:#}", e),
            }

            pending = next_tick(interval, &mut triggers).await;
        }
    }
}

/// Waits out the interval, or returns early with a triggered record id.
async fn next_tick(
    interval: Duration,
    triggers: &mut Option<mpsc::Receiver<String>>,
) -> Option<String> {
    let Some(rx) = triggers.as_mut() else {
        tokio::time::sleep(interval).await;
        return None;
    };

    let received = tokio::select! {
        _ = tokio::time::sleep(interval) => return None,
        message = rx.recv() => message,
    };

    if received.is_none() {
        log::warn!("Webhook trigger channel closed; continuing on schedule only");
        *triggers = None;
        tokio::time::sleep(interval).await;
    }
    received
}
