use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};

/// Publishes a record's address set. Implementations are stateless and
/// single-shot; deciding whether an update is needed is the handler's
/// job.
pub trait DnsUpdater {
    fn upsert_a_record(
        &self,
        hosted_zone_id: &str,
        record_name: &str,
        ipv4s: &BTreeSet<Ipv4Addr>,
        ttl: i64,
    ) -> Result<(), String>;

    /// Remove the A record if it exists. Removing an absent record is a
    /// no-op, not an error.
    fn delete_a_record(&self, hosted_zone_id: &str, record_name: &str) -> Result<(), String>;
}

pub struct Route53DnsUpdater {
    client: aws_sdk_route53::Client,
}

impl Route53DnsUpdater {
    pub fn new(client: aws_sdk_route53::Client) -> Self {
        Self { client }
    }
}

impl DnsUpdater for Route53DnsUpdater {
    fn upsert_a_record(
        &self,
        hosted_zone_id: &str,
        record_name: &str,
        ipv4s: &BTreeSet<Ipv4Addr>,
        ttl: i64,
    ) -> Result<(), String> {
        if ipv4s.is_empty() {
            return Err("refusing to publish an empty address set".to_string());
        }

        let client = self.client.clone();
        let hosted_zone_id = hosted_zone_id.to_string();
        let record_name = record_name.to_string();
        let values: Vec<String> = ipv4s.iter().map(Ipv4Addr::to_string).collect();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let records = values
                    .into_iter()
                    .map(|value| ResourceRecord::builder().value(value).build())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|error| format!("failed to build resource records: {error}"))?;
                let record_set = ResourceRecordSet::builder()
                    .name(record_name)
                    .r#type(RrType::A)
                    .ttl(ttl)
                    .set_resource_records(Some(records))
                    .build()
                    .map_err(|error| format!("failed to build record set: {error}"))?;
                let change = Change::builder()
                    .action(ChangeAction::Upsert)
                    .resource_record_set(record_set)
                    .build()
                    .map_err(|error| format!("failed to build record change: {error}"))?;
                let batch = ChangeBatch::builder()
                    .changes(change)
                    .build()
                    .map_err(|error| format!("failed to build change batch: {error}"))?;

                client
                    .change_resource_record_sets()
                    .hosted_zone_id(hosted_zone_id)
                    .change_batch(batch)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to upsert record set: {error}"))
            })
        })
    }

    fn delete_a_record(&self, hosted_zone_id: &str, record_name: &str) -> Result<(), String> {
        let client = self.client.clone();
        let hosted_zone_id = hosted_zone_id.to_string();
        let record_name = record_name.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let listed = client
                    .list_resource_record_sets()
                    .hosted_zone_id(hosted_zone_id.clone())
                    .start_record_name(record_name.clone())
                    .start_record_type(RrType::A)
                    .max_items(1)
                    .send()
                    .await
                    .map_err(|error| format!("failed to list record sets: {error}"))?;

                // Deleting requires submitting the record set exactly as
                // stored, so look it up first.
                let Some(existing) = listed
                    .resource_record_sets()
                    .iter()
                    .find(|set| {
                        *set.r#type() == RrType::A
                            && set.name().trim_end_matches('.')
                                == record_name.trim_end_matches('.')
                    })
                    .cloned()
                else {
                    return Ok(());
                };

                let change = Change::builder()
                    .action(ChangeAction::Delete)
                    .resource_record_set(existing)
                    .build()
                    .map_err(|error| format!("failed to build record change: {error}"))?;
                let batch = ChangeBatch::builder()
                    .changes(change)
                    .build()
                    .map_err(|error| format!("failed to build change batch: {error}"))?;

                client
                    .change_resource_record_sets()
                    .hosted_zone_id(hosted_zone_id)
                    .change_batch(batch)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to delete record set: {error}"))
            })
        })
    }
}
