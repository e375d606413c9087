use std::collections::{BTreeMap, HashMap};

use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::runtime::attrs::{AttrValue, Item};
use crate::runtime::codec;
use crate::runtime::record::DnsRecordKey;

/// Optimistic-concurrency counter owned by this adapter. It is stripped
/// from items before they reach the codec and re-attached on write, so
/// the codec round-trip law stays over the record's own attributes.
pub const ATTR_VERSION: &str = "version";

/// A stored item together with the version the adapter manages around it.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedItem {
    pub item: Item,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// The conditional check failed: someone else wrote the item first.
    Conflict,
}

pub trait RecordsStore {
    fn get_record(&self, key: &DnsRecordKey) -> Result<Option<VersionedItem>, String>;

    /// Put `item`, expecting the stored version to still be
    /// `expected_version` (`None` means the item must not exist yet).
    fn put_record(&self, item: Item, expected_version: Option<u64>)
        -> Result<WriteOutcome, String>;

    fn delete_record(&self, key: &DnsRecordKey, expected_version: u64)
        -> Result<WriteOutcome, String>;
}

pub struct DynamoRecordsStore {
    table_name: String,
    client: aws_sdk_dynamodb::Client,
}

impl DynamoRecordsStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: String) -> Self {
        Self { table_name, client }
    }
}

impl RecordsStore for DynamoRecordsStore {
    fn get_record(&self, key: &DnsRecordKey) -> Result<Option<VersionedItem>, String> {
        let table_name = self.table_name.clone();
        let client = self.client.clone();
        let sdk_key = item_to_sdk(codec::key_item(key));

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_item()
                    .table_name(table_name)
                    .set_key(Some(sdk_key))
                    .consistent_read(true)
                    .send()
                    .await
                    .map_err(|error| format!("failed to read records item: {error}"))?;

                let Some(mut stored) = output.item else {
                    return Ok(None);
                };
                let version = take_version(&mut stored)?;
                let item = item_from_sdk(stored)?;
                Ok(Some(VersionedItem { item, version }))
            })
        })
    }

    fn put_record(
        &self,
        item: Item,
        expected_version: Option<u64>,
    ) -> Result<WriteOutcome, String> {
        let table_name = self.table_name.clone();
        let client = self.client.clone();

        let mut sdk_item = item_to_sdk(item);
        let next_version = expected_version.map_or(1, |version| version + 1);
        sdk_item.insert(
            ATTR_VERSION.to_string(),
            AttributeValue::N(next_version.to_string()),
        );

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let request = client
                    .put_item()
                    .table_name(table_name)
                    .set_item(Some(sdk_item))
                    .expression_attribute_names("#version", ATTR_VERSION);
                let request = match expected_version {
                    None => request.condition_expression("attribute_not_exists(#version)"),
                    Some(version) => request
                        .condition_expression("#version = :expected")
                        .expression_attribute_values(
                            ":expected",
                            AttributeValue::N(version.to_string()),
                        ),
                };

                match request.send().await {
                    Ok(_) => Ok(WriteOutcome::Stored),
                    Err(SdkError::ServiceError(context))
                        if context.err().is_conditional_check_failed_exception() =>
                    {
                        Ok(WriteOutcome::Conflict)
                    }
                    Err(error) => Err(format!("failed to write records item: {error}")),
                }
            })
        })
    }

    fn delete_record(
        &self,
        key: &DnsRecordKey,
        expected_version: u64,
    ) -> Result<WriteOutcome, String> {
        let table_name = self.table_name.clone();
        let client = self.client.clone();
        let sdk_key = item_to_sdk(codec::key_item(key));

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let result = client
                    .delete_item()
                    .table_name(table_name)
                    .set_key(Some(sdk_key))
                    .condition_expression("#version = :expected")
                    .expression_attribute_names("#version", ATTR_VERSION)
                    .expression_attribute_values(
                        ":expected",
                        AttributeValue::N(expected_version.to_string()),
                    )
                    .send()
                    .await;

                match result {
                    Ok(_) => Ok(WriteOutcome::Stored),
                    Err(SdkError::ServiceError(context))
                        if context.err().is_conditional_check_failed_exception() =>
                    {
                        Ok(WriteOutcome::Conflict)
                    }
                    Err(error) => Err(format!("failed to delete records item: {error}")),
                }
            })
        })
    }
}

pub fn attr_to_sdk(value: AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(value) => AttributeValue::S(value),
        AttrValue::N(value) => AttributeValue::N(value),
        AttrValue::Ss(values) => AttributeValue::Ss(values),
        AttrValue::L(values) => AttributeValue::L(values.into_iter().map(attr_to_sdk).collect()),
        AttrValue::M(fields) => AttributeValue::M(
            fields
                .into_iter()
                .map(|(name, value)| (name, attr_to_sdk(value)))
                .collect(),
        ),
        AttrValue::Null(flag) => AttributeValue::Null(flag),
    }
}

pub fn attr_from_sdk(value: AttributeValue) -> Result<AttrValue, String> {
    match value {
        AttributeValue::S(value) => Ok(AttrValue::S(value)),
        AttributeValue::N(value) => Ok(AttrValue::N(value)),
        AttributeValue::Ss(values) => Ok(AttrValue::Ss(values)),
        AttributeValue::L(values) => Ok(AttrValue::L(
            values
                .into_iter()
                .map(attr_from_sdk)
                .collect::<Result<_, _>>()?,
        )),
        AttributeValue::M(fields) => Ok(AttrValue::M(
            fields
                .into_iter()
                .map(|(name, value)| Ok((name, attr_from_sdk(value)?)))
                .collect::<Result<_, String>>()?,
        )),
        AttributeValue::Null(flag) => Ok(AttrValue::Null(flag)),
        other => Err(format!("unsupported attribute type in stored item: {other:?}")),
    }
}

fn item_to_sdk(item: Item) -> HashMap<String, AttributeValue> {
    item.into_iter()
        .map(|(name, value)| (name, attr_to_sdk(value)))
        .collect()
}

fn item_from_sdk(item: HashMap<String, AttributeValue>) -> Result<Item, String> {
    item.into_iter()
        .map(|(name, value)| Ok((name, attr_from_sdk(value)?)))
        .collect::<Result<BTreeMap<_, _>, String>>()
}

fn take_version(item: &mut HashMap<String, AttributeValue>) -> Result<u64, String> {
    let value = item
        .remove(ATTR_VERSION)
        .ok_or_else(|| format!("stored records item is missing its `{ATTR_VERSION}` attribute"))?;
    let text = value
        .as_n()
        .map_err(|_| format!("stored `{ATTR_VERSION}` attribute is not a number"))?;
    text.parse()
        .map_err(|_| format!("stored `{ATTR_VERSION}` attribute `{text}` is not an integer"))
}
