//! Typed contract for the orchestrator's task state-change event, as
//! delivered on the event bus. Only the slice this system reads is
//! modeled; everything else in the event is ignored.

use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;

use crate::record::{EniInfo, TaskInfo};

pub const EVENT_SOURCE_ECS: &str = "aws.ecs";
pub const TASK_STATE_CHANGE_DETAIL_TYPE: &str = "ECS Task State Change";

const ATTACHMENT_TYPE_ENI: &str = "eni";
const DETAIL_NETWORK_INTERFACE_ID: &str = "networkInterfaceId";
const STATUS_STOPPED: &str = "STOPPED";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateChange {
    pub task_arn: String,
    #[serde(default)]
    pub cluster_arn: Option<String>,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<TaskAttachment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskAttachment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub details: Vec<AttachmentDetail>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentDetail {
    pub name: String,
    pub value: String,
}

impl TaskStateChange {
    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some() || self.last_status == STATUS_STOPPED
    }

    /// Network interface ids attached to the task, in event order.
    pub fn eni_ids(&self) -> Vec<&str> {
        self.attachments
            .iter()
            .filter(|attachment| attachment.kind == ATTACHMENT_TYPE_ENI)
            .flat_map(|attachment| attachment.details.iter())
            .filter(|detail| detail.name == DETAIL_NETWORK_INTERFACE_ID)
            .map(|detail| detail.value.as_str())
            .collect()
    }

    /// Snapshot this event as a task entry: ENI ids without addresses
    /// (public addresses are resolved separately), and for a stopped
    /// task the stop time truncated to microsecond precision. A stopped
    /// event without an explicit stop time falls back to `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TaskInfo {
        let stopped_datetime = if self.is_stopped() {
            Some(truncate_to_micros(self.stopped_at.unwrap_or(now)))
        } else {
            None
        };

        TaskInfo {
            task_arn: self.task_arn.clone(),
            stopped_datetime,
            enis: self
                .eni_ids()
                .into_iter()
                .map(|eni_id| EniInfo {
                    eni_id: eni_id.to_string(),
                    public_ipv4: None,
                })
                .collect(),
        }
    }
}

fn truncate_to_micros(value: DateTime<Utc>) -> chrono::NaiveDateTime {
    let naive = value.naive_utc();
    naive
        .with_nanosecond(naive.nanosecond() / 1_000 * 1_000)
        .unwrap_or(naive)
}
