use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::dns_update::DnsUpdater;

/// The slice of a stack custom-resource request this handler reads.
/// Response delivery back to the stack service is owned by the provider
/// framework that invokes us.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CleanupRequest {
    #[serde(rename = "RequestType")]
    pub request_type: String,
    #[serde(rename = "PhysicalResourceId", default)]
    pub physical_resource_id: Option<String>,
    #[serde(rename = "ResourceProperties", default)]
    pub resource_properties: CleanupProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CleanupProperties {
    #[serde(rename = "HostedZoneId", default)]
    pub hosted_zone_id: String,
    #[serde(rename = "RecordName", default)]
    pub record_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupResponse {
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,
}

/// On stack deletion, remove whatever A record the reconciliation
/// handler left behind. Create and update are no-ops: record upkeep is
/// the queue handler's job.
pub fn handle_cleanup_event(
    event: &Value,
    dns: &impl DnsUpdater,
) -> Result<CleanupResponse, String> {
    let request: CleanupRequest = serde_json::from_value(event.clone())
        .map_err(|error| format!("malformed custom resource request: {error}"))?;
    let properties = &request.resource_properties;

    let physical_resource_id = request.physical_resource_id.clone().unwrap_or_else(|| {
        format!(
            "{}:{}",
            properties.hosted_zone_id, properties.record_name
        )
    });

    match request.request_type.as_str() {
        "Delete" => {
            if properties.hosted_zone_id.is_empty() || properties.record_name.is_empty() {
                return Err(
                    "HostedZoneId and RecordName resource properties are required".to_string(),
                );
            }
            dns.delete_a_record(&properties.hosted_zone_id, &properties.record_name)?;
            log_cleanup_info(
                "record_removed",
                json!({
                    "hosted_zone_id": properties.hosted_zone_id.clone(),
                    "record_name": properties.record_name.clone(),
                }),
            );
        }
        "Create" | "Update" => {}
        other => return Err(format!("unsupported request type `{other}`")),
    }

    Ok(CleanupResponse {
        physical_resource_id,
    })
}

fn log_cleanup_info(event: &str, details: Value) {
    eprintln!(
        "{}",
        json!({
            "component": "cleanup_handler",
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "details": details,
        })
    );
}
