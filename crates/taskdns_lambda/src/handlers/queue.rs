use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::dns_update::DnsUpdater;
use crate::adapters::eni_lookup::PublicIpResolver;
use crate::adapters::records_store::{RecordsStore, WriteOutcome};
use crate::runtime::codec;
use crate::runtime::events::{TaskStateChange, EVENT_SOURCE_ECS, TASK_STATE_CHANGE_DETAIL_TYPE};
use crate::runtime::record::{DnsRecord, DnsRecordKey, TaskInfo};

const MAX_WRITE_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueHandlerConfig {
    pub hosted_zone_id: String,
    pub record_name: String,
    /// When set, events from other clusters are skipped.
    pub cluster_arn: Option<String>,
    pub dns_ttl: i64,
    /// How long a stopped task's tombstone is kept before being purged.
    pub task_expiration: Duration,
}

impl QueueHandlerConfig {
    pub fn record_key(&self) -> DnsRecordKey {
        DnsRecordKey {
            hosted_zone_id: self.hosted_zone_id.clone(),
            record_name: self.record_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueHandlerSummary {
    pub status: String,
    pub events_seen: usize,
    pub events_skipped: usize,
    /// Addresses pushed to DNS by this invocation, empty when nothing
    /// was published.
    pub published_ipv4s: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandlerError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTaskEvents {
    pub events: Vec<TaskStateChange>,
    /// Envelopes that were well-formed but not task state changes.
    pub skipped: usize,
}

enum RecordOutcome {
    Unchanged,
    Stored(DnsRecord),
    Deleted,
}

pub fn handle_queue_event(
    event: &Value,
    config: &QueueHandlerConfig,
    store: &impl RecordsStore,
    resolver: &impl PublicIpResolver,
    dns: &impl DnsUpdater,
    now: DateTime<Utc>,
) -> Result<QueueHandlerSummary, QueueHandlerError> {
    let decoded = decode_sqs_task_events(event).map_err(|message| QueueHandlerError { message })?;
    let events_seen = decoded.events.len() + decoded.skipped;
    let mut events_skipped = decoded.skipped;

    log_queue_info(
        "events_received",
        json!({
            "record_name": config.record_name.clone(),
            "events_seen": events_seen,
        }),
    );

    let mut tasks: Vec<TaskInfo> = Vec::with_capacity(decoded.events.len());
    for change in &decoded.events {
        if let Some(cluster_arn) = &config.cluster_arn {
            if change.cluster_arn.as_deref() != Some(cluster_arn.as_str()) {
                events_skipped += 1;
                log_queue_info(
                    "event_skipped",
                    json!({
                        "task_arn": change.task_arn.clone(),
                        "reason": "other_cluster",
                    }),
                );
                continue;
            }
        }

        let mut task = change.snapshot(now);
        if !task.is_stopped() {
            let eni_ids: Vec<String> = task.enis.iter().map(|eni| eni.eni_id.clone()).collect();
            let resolved = resolver
                .public_ipv4s(&eni_ids)
                .map_err(|message| QueueHandlerError { message })?;
            for eni in &mut task.enis {
                eni.public_ipv4 = resolved.get(&eni.eni_id).copied();
            }
        }
        tasks.push(task);
    }

    if tasks.is_empty() {
        return Ok(QueueHandlerSummary {
            status: "unchanged".to_string(),
            events_seen,
            events_skipped,
            published_ipv4s: Vec::new(),
        });
    }

    let outcome = apply_task_updates(config, store, &tasks, now)
        .map_err(|message| QueueHandlerError { message })?;

    let (status, published_ipv4s) = match outcome {
        RecordOutcome::Unchanged => ("unchanged", Vec::new()),
        RecordOutcome::Stored(record) => {
            if record.ipv4s.is_empty() {
                dns.delete_a_record(&config.hosted_zone_id, &config.record_name)
                    .map_err(|message| QueueHandlerError { message })?;
                ("updated", Vec::new())
            } else {
                dns.upsert_a_record(
                    &config.hosted_zone_id,
                    &config.record_name,
                    &record.ipv4s,
                    config.dns_ttl,
                )
                .map_err(|message| QueueHandlerError { message })?;
                (
                    "updated",
                    record.ipv4s.iter().map(ToString::to_string).collect(),
                )
            }
        }
        RecordOutcome::Deleted => {
            dns.delete_a_record(&config.hosted_zone_id, &config.record_name)
                .map_err(|message| QueueHandlerError { message })?;
            ("deleted", Vec::new())
        }
    };

    log_queue_info(
        "record_reconciled",
        json!({
            "record_name": config.record_name.clone(),
            "status": status,
            "published_ipv4s": published_ipv4s.clone(),
        }),
    );

    Ok(QueueHandlerSummary {
        status: status.to_string(),
        events_seen,
        events_skipped,
        published_ipv4s,
    })
}

/// Pull task state changes out of an SQS-delivered event-bus batch.
/// Envelopes from other sources are counted and skipped; a malformed
/// record is an error, never silently dropped.
pub fn decode_sqs_task_events(event: &Value) -> Result<DecodedTaskEvents, String> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| "SQS event must include Records array".to_string())?;

    let mut events = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for record in records {
        let body = record
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| "SQS record body must be a string".to_string())?;
        let envelope: Value = serde_json::from_str(body)
            .map_err(|error| format!("malformed SQS record body: {error}"))?;

        let source = envelope.get("source").and_then(Value::as_str);
        let detail_type = envelope.get("detail-type").and_then(Value::as_str);
        if source != Some(EVENT_SOURCE_ECS) || detail_type != Some(TASK_STATE_CHANGE_DETAIL_TYPE) {
            skipped += 1;
            continue;
        }

        let detail = envelope
            .get("detail")
            .ok_or_else(|| "task state change event must include detail".to_string())?;
        let change: TaskStateChange = serde_json::from_value(detail.clone())
            .map_err(|error| format!("invalid task state change detail: {error}"))?;
        events.push(change);
    }

    Ok(DecodedTaskEvents { events, skipped })
}

/// Optimistic read-modify-write: decode the stored item (or start an
/// empty record), fold in the task updates, purge expired tombstones,
/// and write back conditionally. A record whose last task is gone is
/// deleted rather than stored.
fn apply_task_updates(
    config: &QueueHandlerConfig,
    store: &impl RecordsStore,
    tasks: &[TaskInfo],
    now: DateTime<Utc>,
) -> Result<RecordOutcome, String> {
    let key = config.record_key();

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let stored = store.get_record(&key)?;
        let (mut record, expected_version) = match stored {
            Some(versioned) => {
                let record = codec::decode_record(&versioned.item).map_err(|error| {
                    format!(
                        "stored item for `{}` failed to decode: {error}",
                        key.record_name
                    )
                })?;
                (record, Some(versioned.version))
            }
            None => (DnsRecord::new(key.clone()), None),
        };

        let mut changed = false;
        for task in tasks {
            changed |= record.apply_task(task.clone());
        }
        changed |= record.expire_stopped_tasks(now.naive_utc(), config.task_expiration) > 0;

        if !changed {
            return Ok(RecordOutcome::Unchanged);
        }

        if record.has_tasks() {
            let item = codec::encode_record(&record).map_err(|error| error.to_string())?;
            match store.put_record(item, expected_version)? {
                WriteOutcome::Stored => return Ok(RecordOutcome::Stored(record)),
                WriteOutcome::Conflict => {
                    log_write_conflict(&key, attempt);
                    continue;
                }
            }
        }

        match expected_version {
            // Nothing stored and nothing left to store.
            None => return Ok(RecordOutcome::Deleted),
            Some(version) => match store.delete_record(&key, version)? {
                WriteOutcome::Stored => return Ok(RecordOutcome::Deleted),
                WriteOutcome::Conflict => {
                    log_write_conflict(&key, attempt);
                    continue;
                }
            },
        }
    }

    Err(format!(
        "records item for `{}` kept changing underneath us after {MAX_WRITE_ATTEMPTS} attempts",
        key.record_name
    ))
}

fn log_write_conflict(key: &DnsRecordKey, attempt: usize) {
    log_queue_info(
        "write_conflict",
        json!({
            "record_name": key.record_name.clone(),
            "attempt": attempt,
        }),
    );
}

fn log_queue_info(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "queue_handler",
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}
