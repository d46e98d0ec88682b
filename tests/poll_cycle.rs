//! Poll loop behaviour against in-memory collaborators: deduplication,
//! ordering, failure handling and watermark persistence.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use pto_notifier::config::FieldLabels;
use pto_notifier::models::record::Record;
use pto_notifier::services::notion::RecordSource;
use pto_notifier::services::slack::Notifier;
use pto_notifier::services::watermark::{
    FileWatermarkStore, MemoryWatermarkStore, Watermark, WatermarkStore,
};
use pto_notifier::tasks::poll_task::{CycleReport, Poller};

#[derive(Clone, Default)]
struct FakeSource {
    records: Arc<Mutex<Vec<Record>>>,
    // Retrievable by id but not yet returned by the query.
    unindexed: Arc<Mutex<Vec<Record>>>,
    offline: Arc<Mutex<bool>>,
}

impl FakeSource {
    fn with(records: Vec<Record>) -> Self {
        let source = Self::default();
        *source.records.lock().unwrap() = records;
        source
    }

    fn push(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    fn push_unindexed(&self, record: Record) {
        self.unindexed.lock().unwrap().push(record);
    }

    fn index_all(&self) {
        let pending: Vec<Record> = self.unindexed.lock().unwrap().drain(..).collect();
        self.records.lock().unwrap().extend(pending);
    }

    fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch_records(&self) -> Result<Vec<Record>> {
        if *self.offline.lock().unwrap() {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn fetch_record(&self, id: &str) -> Result<Record> {
        let indexed = self.records.lock().unwrap().clone();
        let unindexed = self.unindexed.lock().unwrap().clone();
        indexed
            .into_iter()
            .chain(unindexed)
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("object_not_found"))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    reject_containing: Arc<Mutex<Option<String>>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn reject(&self, needle: Option<&str>) {
        *self.reject_containing.lock().unwrap() = needle.map(str::to_string);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        if let Some(needle) = self.reject_containing.lock().unwrap().as_deref() {
            if text.contains(needle) {
                return Err(anyhow!("channel_not_found"));
            }
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn rich(kind: &str, text: &str) -> Value {
    json!({ "type": kind, kind: [{ "type": "text", "text": { "content": text }, "plain_text": text }] })
}

fn pto_record(id: &str, created: &str, title: &str) -> Record {
    Record::from_value(json!({
        "object": "page",
        "id": id,
        "created_time": created,
        "properties": {
            "PTO Request Title": rich("title", title)
        }
    }))
    .unwrap()
}

fn memory_poller(
    source: &FakeSource,
    notifier: &RecordingNotifier,
) -> Poller<FakeSource, RecordingNotifier, MemoryWatermarkStore> {
    Poller::new(
        source.clone(),
        notifier.clone(),
        MemoryWatermarkStore::new(),
        FieldLabels::default(),
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn end_to_end_single_record() {
    let record = Record::from_value(json!({
        "object": "page",
        "id": "page-1",
        "created_time": "2024-01-01T10:00:00Z",
        "properties": {
            "PTO Request Title": rich("title", "Vacation"),
            "PTO Type": { "type": "select", "select": { "name": "Annual" } },
            "PTO Date": { "type": "date", "date": { "start": "2024-01-05", "end": "2024-01-07" } },
            "Additional Notes": rich("rich_text", "Family trip")
        }
    }))
    .unwrap();

    let source = FakeSource::with(vec![record]);
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    let report = poller.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            fetched: 1,
            eligible: 1,
            sent: 1
        }
    );

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    for expected in ["Vacation", "Annual", "2024-01-05 → 2024-01-07", "Family trip", "Anonymous"] {
        assert!(sent[0].contains(expected), "missing {:?} in {:?}", expected, sent[0]);
    }
    assert_eq!(poller.watermark().to_string(), "2024-01-01T10:00:00Z");

    // Same data again: nothing new to send.
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.eligible, 0);
    assert_eq!(report.sent, 0);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn repeated_cycles_notify_each_record_once() {
    let source = FakeSource::with(vec![
        pto_record("a", "2024-01-01T10:00:00Z", "First"),
        pto_record("b", "2024-01-01T11:00:00Z", "Second"),
    ]);
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    for _ in 0..3 {
        poller.run_cycle().await.unwrap();
    }
    assert_eq!(notifier.sent().len(), 2);

    source.push(pto_record("c", "2024-01-01T12:00:00Z", "Third"));
    poller.run_cycle().await.unwrap();
    poller.run_cycle().await.unwrap();

    let sent = notifier.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[2].contains("Third"));
}

#[tokio::test]
async fn notifications_follow_creation_order() {
    let source = FakeSource::with(vec![
        pto_record("t2", "2024-01-02T00:00:00Z", "Two"),
        pto_record("t3", "2024-01-03T00:00:00Z", "Three"),
        pto_record("t1", "2024-01-01T00:00:00Z", "One"),
    ]);
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    poller.run_cycle().await.unwrap();

    let titles: Vec<&str> = ["One", "Two", "Three"].to_vec();
    let sent = notifier.sent();
    assert_eq!(sent.len(), 3);
    for (message, title) in sent.iter().zip(titles) {
        assert!(message.contains(&format!("*Title:* {}", title)));
    }
}

#[tokio::test]
async fn watermark_tracks_maximum_and_never_decreases() {
    let source = FakeSource::with(vec![pto_record("b", "2024-01-02T00:00:00Z", "B")]);
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    poller.run_cycle().await.unwrap();
    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-02T00:00:00Z")));

    // A late-arriving older record is below the watermark and stays silent.
    source.push(pto_record("a", "2024-01-01T00:00:00Z", "A"));
    source.push(pto_record("c", "2024-01-03T00:00:00Z", "C"));
    poller.run_cycle().await.unwrap();
    poller.run_cycle().await.unwrap();

    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-03T00:00:00Z")));
    let history = poller.store().history();
    assert_eq!(history.len(), 2);
    assert!(history.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn failed_send_stops_cycle_and_keeps_record_eligible() {
    let source = FakeSource::with(vec![
        pto_record("a", "2024-01-01T00:00:00Z", "Alpha"),
        pto_record("b", "2024-01-02T00:00:00Z", "Bravo"),
        pto_record("c", "2024-01-03T00:00:00Z", "Charlie"),
    ]);
    let notifier = RecordingNotifier::default();
    notifier.reject(Some("Bravo"));
    let mut poller = memory_poller(&source, &notifier);

    let err = poller.run_cycle().await.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to notify record b"));
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-01T00:00:00Z")));

    notifier.reject(None);
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.sent, 2);

    let sent = notifier.sent();
    assert!(sent[1].contains("Bravo"));
    assert!(sent[2].contains("Charlie"));
    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-03T00:00:00Z")));
}

#[tokio::test]
async fn failed_send_inside_tie_group_is_retried() {
    let source = FakeSource::with(vec![
        pto_record("a", "2024-01-01T10:00:00.000Z", "Alpha"),
        pto_record("b", "2024-01-01T10:00:00.000Z", "Bravo"),
    ]);
    let notifier = RecordingNotifier::default();
    notifier.reject(Some("Bravo"));
    let mut poller = memory_poller(&source, &notifier);

    let err = poller.run_cycle().await.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to notify record b"));
    assert!(poller.watermark().is_empty());
    assert!(poller.store().history().is_empty());

    notifier.reject(None);
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.eligible, 1);
    assert_eq!(report.sent, 1);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("Alpha"));
    assert!(sent[1].contains("Bravo"));
    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-01T10:00:00Z")));

    assert_eq!(poller.run_cycle().await.unwrap().sent, 0);
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn triggered_record_does_not_hide_older_unindexed_records() {
    let source = FakeSource::default();
    source.push_unindexed(pto_record("a", "2024-01-01T10:00:00.000Z", "Alpha"));
    source.push_unindexed(pto_record("b", "2024-01-01T10:01:00.000Z", "Bravo"));
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    let report = poller.run_triggered_cycle("b").await.unwrap();
    assert_eq!(report.sent, 1);
    assert!(notifier.sent()[0].contains("Bravo"));
    assert!(poller.watermark().is_empty());

    source.index_all();
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.sent, 1);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("Alpha"));
    assert_eq!(poller.watermark(), Watermark::at(ts("2024-01-01T10:01:00Z")));

    assert_eq!(poller.run_cycle().await.unwrap().sent, 0);
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn fetch_failure_is_reported_and_recovers() {
    let source = FakeSource::with(vec![pto_record("a", "2024-01-01T00:00:00Z", "Alpha")]);
    source.set_offline(true);
    let notifier = RecordingNotifier::default();
    let mut poller = memory_poller(&source, &notifier);

    assert!(poller.run_cycle().await.is_err());
    assert!(poller.watermark().is_empty());
    assert!(notifier.sent().is_empty());

    source.set_offline(false);
    assert_eq!(poller.run_cycle().await.unwrap().sent, 1);
}

#[tokio::test]
async fn restart_resumes_from_persisted_watermark() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("last_seen.txt");

    let source = FakeSource::with(vec![pto_record("a", "2024-01-01T10:00:00.000Z", "Alpha")]);
    let notifier = RecordingNotifier::default();

    {
        let mut poller = Poller::new(
            source.clone(),
            notifier.clone(),
            FileWatermarkStore::new(&path),
            FieldLabels::default(),
            None,
        )
        .unwrap();
        poller.run_cycle().await.unwrap();
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "2024-01-01T10:00:00Z");

    // Backlog accumulated while the process was down, out of order.
    source.push(pto_record("c", "2024-01-03T00:00:00Z", "Charlie"));
    source.push(pto_record("b", "2024-01-02T00:00:00Z", "Bravo"));

    let mut restarted = Poller::new(
        source.clone(),
        notifier.clone(),
        FileWatermarkStore::new(&path),
        FieldLabels::default(),
        None,
    )
    .unwrap();
    assert_eq!(restarted.watermark(), Watermark::at(ts("2024-01-01T10:00:00Z")));

    let report = restarted.run_cycle().await.unwrap();
    assert_eq!(report.sent, 2);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[1].contains("Bravo"));
    assert!(sent[2].contains("Charlie"));
    assert_eq!(
        FileWatermarkStore::new(&path).load().unwrap(),
        Watermark::at(ts("2024-01-03T00:00:00Z"))
    );
}

#[tokio::test]
async fn trigger_wakes_the_loop_early() {
    let source = FakeSource::default();
    let notifier = RecordingNotifier::default();
    let poller = memory_poller(&source, &notifier);

    let (tx, rx) = mpsc::channel(4);
    let handle = tokio::spawn(poller.run(Duration::from_secs(3600), rx));

    // Let the first (empty) cycle finish, then announce a new record.
    tokio::time::sleep(Duration::from_millis(50)).await;
    source.push(pto_record("n1", "2024-05-01T00:00:00Z", "Webhook"));
    tx.send("n1".to_string()).await.unwrap();

    let mut delivered = false;
    for _ in 0..100 {
        if !notifier.sent().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert!(delivered, "triggered record was not notified");
    assert_eq!(notifier.sent().len(), 1);
    assert!(notifier.sent()[0].contains("Webhook"));
}
