//! Bidirectional, lossless mapping between [`DnsRecord`] and its
//! persisted item representation.
//!
//! The codec is pure: all I/O against the item store belongs to the
//! caller. Re-encoding a decoded item reproduces it exactly, which is
//! load-bearing because the persisted shape is shared with other
//! systems. Canonical items omit absent optional attributes (rather
//! than writing explicit nulls) and keep the address set sorted.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::attrs::{AttrValue, Item};
use crate::record::{DnsRecord, DnsRecordKey, EniInfo, TaskInfo};

pub const ATTR_HOSTED_ZONE_ID: &str = "hosted_zone_id";
pub const ATTR_RECORD_NAME: &str = "record_name";
pub const ATTR_IPV4S: &str = "ipv4s";
pub const ATTR_TASK_INFO: &str = "task_info";
pub const ATTR_TASK_ARN: &str = "task_arn";
pub const ATTR_TASK_STOPPED: &str = "stopped_datetime";
pub const ATTR_TASK_ENIS: &str = "enis";
pub const ATTR_ENI_ID: &str = "eni_id";
pub const ATTR_ENI_PUBLIC_IPV4: &str = "public_ipv4";

const STOPPED_ENCODE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const STOPPED_DECODE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A persisted item does not conform to the expected shape. The path
/// names the offending attribute, dotted into nested maps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{path}` must be a {expected} attribute, got {found}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field `{path}` is malformed: {message}")]
    Malformed { path: String, message: String },
}

/// An in-memory record violates an invariant that would make its item
/// non-round-trippable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("task entry keyed `{map_key}` carries task_arn `{task_arn}`")]
    TaskArnMismatch { map_key: String, task_arn: String },
}

/// The primary-key attribute pair used by the store for get/delete.
pub fn key_item(key: &DnsRecordKey) -> Item {
    BTreeMap::from([
        (
            ATTR_HOSTED_ZONE_ID.to_string(),
            AttrValue::S(key.hosted_zone_id.clone()),
        ),
        (
            ATTR_RECORD_NAME.to_string(),
            AttrValue::S(key.record_name.clone()),
        ),
    ])
}

pub fn decode_record(item: &Item) -> Result<DnsRecord, DecodeError> {
    let hosted_zone_id = require_s(item, ATTR_HOSTED_ZONE_ID)?.to_string();
    let record_name = require_s(item, ATTR_RECORD_NAME)?.to_string();

    let mut ipv4s = BTreeSet::new();
    if let Some(value) = present(item.get(ATTR_IPV4S)) {
        let entries = value
            .as_ss()
            .ok_or_else(|| wrong_type(ATTR_IPV4S, "SS", value))?;
        for entry in entries {
            ipv4s.insert(parse_ipv4(entry, ATTR_IPV4S)?);
        }
    }

    let tasks_value = item
        .get(ATTR_TASK_INFO)
        .ok_or_else(|| DecodeError::MissingField(ATTR_TASK_INFO.to_string()))?;
    let task_entries = tasks_value
        .as_m()
        .ok_or_else(|| wrong_type(ATTR_TASK_INFO, "M", tasks_value))?;

    let mut task_info = BTreeMap::new();
    for (task_arn, entry) in task_entries {
        let path = format!("{ATTR_TASK_INFO}.{task_arn}");
        let task = decode_task_info(task_arn, entry, &path)?;
        task_info.insert(task_arn.clone(), task);
    }

    Ok(DnsRecord {
        key: DnsRecordKey {
            hosted_zone_id,
            record_name,
        },
        ipv4s,
        task_info,
    })
}

pub fn encode_record(record: &DnsRecord) -> Result<Item, EncodeError> {
    let mut item = key_item(&record.key);

    if !record.ipv4s.is_empty() {
        item.insert(
            ATTR_IPV4S.to_string(),
            AttrValue::Ss(record.ipv4s.iter().map(Ipv4Addr::to_string).collect()),
        );
    }

    let mut tasks = BTreeMap::new();
    for (map_key, task) in &record.task_info {
        if task.task_arn != *map_key {
            return Err(EncodeError::TaskArnMismatch {
                map_key: map_key.clone(),
                task_arn: task.task_arn.clone(),
            });
        }
        tasks.insert(map_key.clone(), AttrValue::M(encode_task_info(task)));
    }
    item.insert(ATTR_TASK_INFO.to_string(), AttrValue::M(tasks));

    Ok(item)
}

fn decode_task_info(map_key: &str, value: &AttrValue, path: &str) -> Result<TaskInfo, DecodeError> {
    let fields = value.as_m().ok_or_else(|| wrong_type(path, "M", value))?;

    let arn_path = format!("{path}.{ATTR_TASK_ARN}");
    let arn_value = fields
        .get(ATTR_TASK_ARN)
        .ok_or_else(|| DecodeError::MissingField(arn_path.clone()))?;
    let task_arn = arn_value
        .as_s()
        .ok_or_else(|| wrong_type(&arn_path, "S", arn_value))?;
    if task_arn != map_key {
        return Err(DecodeError::Malformed {
            path: arn_path,
            message: format!("task_arn `{task_arn}` disagrees with its map key `{map_key}`"),
        });
    }

    let enis_path = format!("{path}.{ATTR_TASK_ENIS}");
    let enis_value = fields
        .get(ATTR_TASK_ENIS)
        .ok_or_else(|| DecodeError::MissingField(enis_path.clone()))?;
    let eni_entries = enis_value
        .as_l()
        .ok_or_else(|| wrong_type(&enis_path, "L", enis_value))?;
    let mut enis = Vec::with_capacity(eni_entries.len());
    for (index, entry) in eni_entries.iter().enumerate() {
        enis.push(decode_eni_info(entry, &format!("{enis_path}[{index}]"))?);
    }

    let stopped_path = format!("{path}.{ATTR_TASK_STOPPED}");
    let stopped_datetime = match present(fields.get(ATTR_TASK_STOPPED)) {
        None => None,
        Some(value) => {
            let text = value
                .as_s()
                .ok_or_else(|| wrong_type(&stopped_path, "S", value))?;
            Some(parse_stopped(text, &stopped_path)?)
        }
    };

    Ok(TaskInfo {
        task_arn: task_arn.to_string(),
        stopped_datetime,
        enis,
    })
}

fn decode_eni_info(value: &AttrValue, path: &str) -> Result<EniInfo, DecodeError> {
    let fields = value.as_m().ok_or_else(|| wrong_type(path, "M", value))?;

    let id_path = format!("{path}.{ATTR_ENI_ID}");
    let id_value = fields
        .get(ATTR_ENI_ID)
        .ok_or_else(|| DecodeError::MissingField(id_path.clone()))?;
    let eni_id = id_value
        .as_s()
        .ok_or_else(|| wrong_type(&id_path, "S", id_value))?;

    let ipv4_path = format!("{path}.{ATTR_ENI_PUBLIC_IPV4}");
    let public_ipv4 = match present(fields.get(ATTR_ENI_PUBLIC_IPV4)) {
        None => None,
        Some(value) => {
            let text = value
                .as_s()
                .ok_or_else(|| wrong_type(&ipv4_path, "S", value))?;
            Some(parse_ipv4(text, &ipv4_path)?)
        }
    };

    Ok(EniInfo {
        eni_id: eni_id.to_string(),
        public_ipv4,
    })
}

fn encode_task_info(task: &TaskInfo) -> BTreeMap<String, AttrValue> {
    let mut fields = BTreeMap::new();
    fields.insert(
        ATTR_TASK_ARN.to_string(),
        AttrValue::S(task.task_arn.clone()),
    );
    fields.insert(
        ATTR_TASK_ENIS.to_string(),
        AttrValue::L(
            task.enis
                .iter()
                .map(|eni| AttrValue::M(encode_eni_info(eni)))
                .collect(),
        ),
    );
    if let Some(stopped) = task.stopped_datetime {
        fields.insert(
            ATTR_TASK_STOPPED.to_string(),
            AttrValue::S(stopped.format(STOPPED_ENCODE_FORMAT).to_string()),
        );
    }
    fields
}

fn encode_eni_info(eni: &EniInfo) -> BTreeMap<String, AttrValue> {
    let mut fields = BTreeMap::new();
    fields.insert(ATTR_ENI_ID.to_string(), AttrValue::S(eni.eni_id.clone()));
    if let Some(ipv4) = eni.public_ipv4 {
        fields.insert(
            ATTR_ENI_PUBLIC_IPV4.to_string(),
            AttrValue::S(ipv4.to_string()),
        );
    }
    fields
}

/// An explicit null attribute reads the same as an absent one.
fn present(value: Option<&AttrValue>) -> Option<&AttrValue> {
    value.filter(|value| !value.is_null())
}

fn require_s<'a>(item: &'a Item, name: &str) -> Result<&'a str, DecodeError> {
    let value = item
        .get(name)
        .ok_or_else(|| DecodeError::MissingField(name.to_string()))?;
    value.as_s().ok_or_else(|| wrong_type(name, "S", value))
}

fn wrong_type(path: &str, expected: &'static str, found: &AttrValue) -> DecodeError {
    DecodeError::WrongType {
        path: path.to_string(),
        expected,
        found: found.type_tag(),
    }
}

fn parse_ipv4(text: &str, path: &str) -> Result<Ipv4Addr, DecodeError> {
    text.parse().map_err(|_| DecodeError::Malformed {
        path: path.to_string(),
        message: format!("`{text}` is not a dotted-quad IPv4 address"),
    })
}

fn parse_stopped(text: &str, path: &str) -> Result<NaiveDateTime, DecodeError> {
    NaiveDateTime::parse_from_str(text, STOPPED_DECODE_FORMAT).map_err(|error| {
        DecodeError::Malformed {
            path: path.to_string(),
            message: format!("`{text}` is not a valid timestamp: {error}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn ip(text: &str) -> Ipv4Addr {
        text.parse().expect("test address should parse")
    }

    /// The two-task item: one task stopped with a single ENI, one still
    /// running with two ENIs.
    fn stored_item() -> Item {
        serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "ipv4s": {"SS": ["1.1.1.1", "1.1.2.1", "1.1.2.2"]},
            "task_info": {"M": {
                "TASK1_ARN": {"M": {
                    "task_arn": {"S": "TASK1_ARN"},
                    "enis": {"L": [
                        {"M": {"eni_id": {"S": "TASK1_ENI1_ID"}, "public_ipv4": {"S": "1.1.1.1"}}},
                    ]},
                    "stopped_datetime": {"S": "2020-10-04T23:47:36.322158"},
                }},
                "TASK2_ARN": {"M": {
                    "task_arn": {"S": "TASK2_ARN"},
                    "enis": {"L": [
                        {"M": {"eni_id": {"S": "TASK2_ENI1_ID"}, "public_ipv4": {"S": "1.1.2.1"}}},
                        {"M": {"eni_id": {"S": "TASK2_ENI2_ID"}, "public_ipv4": {"S": "1.1.2.2"}}},
                    ]},
                }},
            }},
        }))
        .expect("stored item fixture should deserialize")
    }

    #[test]
    fn decodes_stored_item_into_expected_record() {
        let record = decode_record(&stored_item()).expect("stored item should decode");

        assert_eq!(record.key.hosted_zone_id, "FOO");
        assert_eq!(record.key.record_name, "test.myexample.com");

        let expected: BTreeSet<Ipv4Addr> = [ip("1.1.1.1"), ip("1.1.2.1"), ip("1.1.2.2")]
            .into_iter()
            .collect();
        assert_eq!(record.ipv4s, expected);
        assert_eq!(record.derived_ipv4s(), expected);

        assert_eq!(
            record.task_info["TASK1_ARN"],
            TaskInfo {
                task_arn: "TASK1_ARN".to_string(),
                stopped_datetime: Some(
                    NaiveDate::from_ymd_opt(2020, 10, 4)
                        .expect("fixture date should exist")
                        .and_hms_micro_opt(23, 47, 36, 322_158)
                        .expect("fixture time should exist")
                ),
                enis: vec![EniInfo {
                    eni_id: "TASK1_ENI1_ID".to_string(),
                    public_ipv4: Some(ip("1.1.1.1")),
                }],
            }
        );
        assert_eq!(
            record.task_info["TASK2_ARN"],
            TaskInfo {
                task_arn: "TASK2_ARN".to_string(),
                stopped_datetime: None,
                enis: vec![
                    EniInfo {
                        eni_id: "TASK2_ENI1_ID".to_string(),
                        public_ipv4: Some(ip("1.1.2.1")),
                    },
                    EniInfo {
                        eni_id: "TASK2_ENI2_ID".to_string(),
                        public_ipv4: Some(ip("1.1.2.2")),
                    },
                ],
            }
        );
    }

    #[test]
    fn reencoding_a_decoded_item_reproduces_it_exactly() {
        let item = stored_item();
        let record = decode_record(&item).expect("stored item should decode");
        let reencoded = encode_record(&record).expect("decoded record should encode");
        assert_eq!(reencoded, item);
    }

    #[test]
    fn decoding_an_encoded_record_reproduces_it() {
        let record = decode_record(&stored_item()).expect("stored item should decode");
        let item = encode_record(&record).expect("record should encode");
        let decoded = decode_record(&item).expect("encoded item should decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn empty_address_set_is_omitted_from_the_item() {
        let record = DnsRecord::new(DnsRecordKey {
            hosted_zone_id: "FOO".to_string(),
            record_name: "test.myexample.com".to_string(),
        });

        let item = encode_record(&record).expect("empty record should encode");
        assert!(!item.contains_key(ATTR_IPV4S));
        assert_eq!(item[ATTR_TASK_INFO], AttrValue::M(BTreeMap::new()));

        let decoded = decode_record(&item).expect("encoded item should decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn stopped_timestamp_round_trips_to_microsecond_precision() {
        let record = decode_record(&stored_item()).expect("stored item should decode");
        let stopped = record.task_info["TASK1_ARN"]
            .stopped_datetime
            .expect("task 1 should be stopped");
        assert_eq!(
            stopped.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            "2020-10-04T23:47:36.322158"
        );
    }

    #[test]
    fn absent_stopped_timestamp_decodes_to_running() {
        let record = decode_record(&stored_item()).expect("stored item should decode");
        assert_eq!(record.task_info["TASK2_ARN"].stopped_datetime, None);
    }

    #[test]
    fn explicit_null_reads_as_absent() {
        let item: Item = serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "task_info": {"M": {
                "TASK_ARN": {"M": {
                    "task_arn": {"S": "TASK_ARN"},
                    "enis": {"L": [
                        {"M": {"eni_id": {"S": "ENI_ID"}, "public_ipv4": {"NULL": true}}},
                    ]},
                    "stopped_datetime": {"NULL": true},
                }},
            }},
        }))
        .expect("fixture should deserialize");

        let record = decode_record(&item).expect("item with nulls should decode");
        let task = &record.task_info["TASK_ARN"];
        assert_eq!(task.stopped_datetime, None);
        assert_eq!(task.enis[0].public_ipv4, None);
    }

    #[test]
    fn missing_record_name_fails_with_field_identifying_error() {
        let mut item = stored_item();
        item.remove(ATTR_RECORD_NAME);

        let error = decode_record(&item).expect_err("item without record_name should fail");
        assert_eq!(error, DecodeError::MissingField("record_name".to_string()));
    }

    #[test]
    fn malformed_task_entry_is_not_silently_dropped() {
        let item: Item = serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "task_info": {"M": {
                "TASK_ARN": {"S": "not a task entry"},
            }},
        }))
        .expect("fixture should deserialize");

        let error = decode_record(&item).expect_err("malformed task entry should fail");
        assert_eq!(
            error,
            DecodeError::WrongType {
                path: "task_info.TASK_ARN".to_string(),
                expected: "M",
                found: "S",
            }
        );
    }

    #[test]
    fn task_entry_disagreeing_with_its_map_key_fails_decode() {
        let item: Item = serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "task_info": {"M": {
                "TASK_A": {"M": {
                    "task_arn": {"S": "TASK_B"},
                    "enis": {"L": []},
                }},
            }},
        }))
        .expect("fixture should deserialize");

        let error = decode_record(&item).expect_err("mismatched task_arn should fail");
        assert!(matches!(error, DecodeError::Malformed { path, .. } if path == "task_info.TASK_A.task_arn"));
    }

    #[test]
    fn malformed_address_identifies_its_path() {
        let item: Item = serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "task_info": {"M": {
                "TASK_ARN": {"M": {
                    "task_arn": {"S": "TASK_ARN"},
                    "enis": {"L": [
                        {"M": {"eni_id": {"S": "ENI_ID"}, "public_ipv4": {"S": "not-an-address"}}},
                    ]},
                }},
            }},
        }))
        .expect("fixture should deserialize");

        let error = decode_record(&item).expect_err("malformed address should fail");
        assert!(matches!(
            error,
            DecodeError::Malformed { path, .. } if path == "task_info.TASK_ARN.enis[0].public_ipv4"
        ));
    }

    #[test]
    fn malformed_stopped_timestamp_identifies_its_path() {
        let item: Item = serde_json::from_value(json!({
            "hosted_zone_id": {"S": "FOO"},
            "record_name": {"S": "test.myexample.com"},
            "task_info": {"M": {
                "TASK_ARN": {"M": {
                    "task_arn": {"S": "TASK_ARN"},
                    "enis": {"L": []},
                    "stopped_datetime": {"S": "yesterday-ish"},
                }},
            }},
        }))
        .expect("fixture should deserialize");

        let error = decode_record(&item).expect_err("malformed timestamp should fail");
        assert!(matches!(
            error,
            DecodeError::Malformed { path, .. } if path == "task_info.TASK_ARN.stopped_datetime"
        ));
    }

    #[test]
    fn encode_rejects_map_key_disagreeing_with_task_arn() {
        let mut record = decode_record(&stored_item()).expect("stored item should decode");
        let mut task = record.task_info["TASK1_ARN"].clone();
        task.task_arn = "SOMEONE_ELSE".to_string();
        record.task_info.insert("TASK1_ARN".to_string(), task);

        let error = encode_record(&record).expect_err("mismatched record should not encode");
        assert_eq!(
            error,
            EncodeError::TaskArnMismatch {
                map_key: "TASK1_ARN".to_string(),
                task_arn: "SOMEONE_ELSE".to_string(),
            }
        );
    }

    #[test]
    fn key_item_carries_only_the_identity_pair() {
        let key = DnsRecordKey {
            hosted_zone_id: "FOO".to_string(),
            record_name: "test.myexample.com".to_string(),
        };
        let item = key_item(&key);
        assert_eq!(item.len(), 2);
        assert_eq!(item[ATTR_HOSTED_ZONE_ID].as_s(), Some("FOO"));
        assert_eq!(item[ATTR_RECORD_NAME].as_s(), Some("test.myexample.com"));
    }
}
