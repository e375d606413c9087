use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use chrono::{Duration, NaiveDateTime};

/// Storage identity of a record: the hosted zone and the fully qualified
/// name the discovered addresses are published under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DnsRecordKey {
    pub hosted_zone_id: String,
    pub record_name: String,
}

/// One elastic network interface attached to a task. The public address
/// is absent until the platform assigns one, and blanked again once the
/// task stops.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EniInfo {
    pub eni_id: String,
    pub public_ipv4: Option<Ipv4Addr>,
}

/// One orchestrated task contributing addresses to a record.
///
/// Entries are immutable once recorded and replaced wholesale on state
/// change. ENI order carries no meaning, so equality compares the ENI
/// sequence order-insensitively.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub task_arn: String,
    pub stopped_datetime: Option<NaiveDateTime>,
    pub enis: Vec<EniInfo>,
}

impl TaskInfo {
    pub fn is_stopped(&self) -> bool {
        self.stopped_datetime.is_some()
    }

    pub fn public_ipv4s(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.enis.iter().filter_map(|eni| eni.public_ipv4)
    }

    /// Blank every ENI's public address, keeping the ENI ids.
    pub fn clear_public_ipv4s(&mut self) {
        for eni in &mut self.enis {
            eni.public_ipv4 = None;
        }
    }

    fn sorted_enis(&self) -> Vec<&EniInfo> {
        let mut enis: Vec<&EniInfo> = self.enis.iter().collect();
        enis.sort();
        enis
    }
}

impl PartialEq for TaskInfo {
    fn eq(&self, other: &Self) -> bool {
        self.task_arn == other.task_arn
            && self.stopped_datetime == other.stopped_datetime
            && self.sorted_enis() == other.sorted_enis()
    }
}

impl Eq for TaskInfo {}

/// The aggregate stored per hosted-zone/name pair: every contributing
/// task keyed by ARN, plus the address set published to DNS.
///
/// The stored `ipv4s` set is authoritative for round-trip purposes and
/// kept equal to [`DnsRecord::derived_ipv4s`] by every mutation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub key: DnsRecordKey,
    pub ipv4s: BTreeSet<Ipv4Addr>,
    pub task_info: BTreeMap<String, TaskInfo>,
}

impl DnsRecord {
    pub fn new(key: DnsRecordKey) -> Self {
        Self {
            key,
            ipv4s: BTreeSet::new(),
            task_info: BTreeMap::new(),
        }
    }

    pub fn has_tasks(&self) -> bool {
        !self.task_info.is_empty()
    }

    /// The address set reachable from `task_info`, recomputed on demand.
    pub fn derived_ipv4s(&self) -> BTreeSet<Ipv4Addr> {
        self.task_info
            .values()
            .flat_map(TaskInfo::public_ipv4s)
            .collect()
    }

    /// Re-derive the stored address set from the task entries.
    pub fn refresh_ipv4s(&mut self) {
        self.ipv4s = self.derived_ipv4s();
    }

    /// Apply a task state update, replacing any existing entry wholesale.
    ///
    /// A stop blanks the task's addresses but keeps the entry as a
    /// tombstone. A running-task update for a task already recorded as
    /// stopped is dropped: a stop is terminal, which guards against
    /// out-of-order event delivery. Returns whether the record changed.
    pub fn apply_task(&mut self, mut task: TaskInfo) -> bool {
        let existing = self.task_info.get(&task.task_arn);
        if existing.is_some_and(TaskInfo::is_stopped) && !task.is_stopped() {
            return false;
        }
        if task.is_stopped() {
            task.clear_public_ipv4s();
        }
        if existing == Some(&task) {
            return false;
        }
        self.task_info.insert(task.task_arn.clone(), task);
        self.refresh_ipv4s();
        true
    }

    /// Purge stopped entries older than `max_age`. Returns the number of
    /// entries removed.
    pub fn expire_stopped_tasks(&mut self, now: NaiveDateTime, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let before = self.task_info.len();
        self.task_info.retain(|_, task| match task.stopped_datetime {
            Some(stopped) => stopped > cutoff,
            None => true,
        });
        let expired = before - self.task_info.len();
        if expired > 0 {
            self.refresh_ipv4s();
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ip(text: &str) -> Ipv4Addr {
        text.parse().expect("test address should parse")
    }

    fn running_task(task_arn: &str, addresses: &[(&str, &str)]) -> TaskInfo {
        TaskInfo {
            task_arn: task_arn.to_string(),
            stopped_datetime: None,
            enis: addresses
                .iter()
                .map(|(eni_id, address)| EniInfo {
                    eni_id: (*eni_id).to_string(),
                    public_ipv4: Some(ip(address)),
                })
                .collect(),
        }
    }

    fn record() -> DnsRecord {
        DnsRecord::new(DnsRecordKey {
            hosted_zone_id: "Z123".to_string(),
            record_name: "service.example.com".to_string(),
        })
    }

    fn stamp(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 10, 4)
            .expect("test date should exist")
            .and_hms_micro_opt(23, 47, second, 322_158)
            .expect("test time should exist")
    }

    #[test]
    fn task_equality_ignores_eni_order() {
        let forward = running_task("arn:task/1", &[("eni-a", "1.1.1.1"), ("eni-b", "1.1.1.2")]);
        let backward = running_task("arn:task/1", &[("eni-b", "1.1.1.2"), ("eni-a", "1.1.1.1")]);
        assert_eq!(forward, backward);

        let different = running_task("arn:task/1", &[("eni-a", "1.1.1.1"), ("eni-b", "9.9.9.9")]);
        assert_ne!(forward, different);
    }

    #[test]
    fn apply_task_keeps_stored_set_equal_to_derived_set() {
        let mut record = record();
        record.apply_task(running_task(
            "arn:task/1",
            &[("eni-a", "1.1.1.1"), ("eni-b", "1.1.1.2")],
        ));
        record.apply_task(running_task("arn:task/2", &[("eni-c", "1.1.2.1")]));

        let expected: BTreeSet<Ipv4Addr> = [ip("1.1.1.1"), ip("1.1.1.2"), ip("1.1.2.1")]
            .into_iter()
            .collect();
        assert_eq!(record.ipv4s, expected);
        assert_eq!(record.ipv4s, record.derived_ipv4s());
    }

    #[test]
    fn stop_blanks_addresses_and_keeps_tombstone() {
        let mut record = record();
        record.apply_task(running_task("arn:task/1", &[("eni-a", "1.1.1.1")]));
        record.apply_task(running_task("arn:task/2", &[("eni-c", "1.1.2.1")]));

        let mut stopped = running_task("arn:task/1", &[("eni-a", "1.1.1.1")]);
        stopped.stopped_datetime = Some(stamp(36));
        assert!(record.apply_task(stopped));

        let tombstone = &record.task_info["arn:task/1"];
        assert!(tombstone.is_stopped());
        assert_eq!(tombstone.enis[0].public_ipv4, None);
        assert_eq!(tombstone.enis[0].eni_id, "eni-a");

        let expected: BTreeSet<Ipv4Addr> = [ip("1.1.2.1")].into_iter().collect();
        assert_eq!(record.ipv4s, expected);
        assert_eq!(record.ipv4s, record.derived_ipv4s());
    }

    #[test]
    fn late_running_update_cannot_resurrect_stopped_task() {
        let mut record = record();
        let mut stopped = running_task("arn:task/1", &[("eni-a", "1.1.1.1")]);
        stopped.stopped_datetime = Some(stamp(36));
        record.apply_task(stopped);

        let resurrected = record.apply_task(running_task("arn:task/1", &[("eni-a", "1.1.1.1")]));
        assert!(!resurrected);
        assert!(record.task_info["arn:task/1"].is_stopped());
        assert!(record.ipv4s.is_empty());
    }

    #[test]
    fn reapplying_an_identical_update_reports_no_change() {
        let mut record = record();
        let task = running_task("arn:task/1", &[("eni-a", "1.1.1.1")]);
        assert!(record.apply_task(task.clone()));
        assert!(!record.apply_task(task));
    }

    #[test]
    fn expire_removes_only_old_tombstones() {
        let mut record = record();
        let mut old = running_task("arn:task/1", &[("eni-a", "1.1.1.1")]);
        old.stopped_datetime = Some(stamp(0));
        let mut fresh = running_task("arn:task/2", &[("eni-b", "1.1.2.1")]);
        fresh.stopped_datetime = Some(stamp(50));
        record.apply_task(old);
        record.apply_task(fresh);
        record.apply_task(running_task("arn:task/3", &[("eni-c", "1.1.3.1")]));

        let now = stamp(59);
        let expired = record.expire_stopped_tasks(now, Duration::seconds(30));

        assert_eq!(expired, 1);
        assert!(!record.task_info.contains_key("arn:task/1"));
        assert!(record.task_info.contains_key("arn:task/2"));
        assert!(record.task_info.contains_key("arn:task/3"));
        assert_eq!(record.ipv4s, record.derived_ipv4s());
    }
}
