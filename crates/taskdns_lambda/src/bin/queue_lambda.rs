use chrono::{Duration, Utc};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use taskdns_lambda::adapters::dns_update::Route53DnsUpdater;
use taskdns_lambda::adapters::eni_lookup::Ec2PublicIpResolver;
use taskdns_lambda::adapters::records_store::DynamoRecordsStore;
use taskdns_lambda::handlers::queue::{
    handle_queue_event, QueueHandlerConfig, QueueHandlerSummary,
};

const DEFAULT_DNS_TTL: i64 = 60;
const DEFAULT_TASK_EXPIRATION_SECONDS: i64 = 3_600;

async fn handle_request(event: LambdaEvent<Value>) -> Result<QueueHandlerSummary, Error> {
    let table_name = std::env::var("RECORDS_TABLE")
        .map_err(|_| Error::from("RECORDS_TABLE must be configured"))?;
    let config = QueueHandlerConfig {
        hosted_zone_id: std::env::var("HOSTED_ZONE_ID")
            .map_err(|_| Error::from("HOSTED_ZONE_ID must be configured"))?,
        record_name: std::env::var("RECORD_NAME")
            .map_err(|_| Error::from("RECORD_NAME must be configured"))?,
        cluster_arn: std::env::var("CLUSTER_ARN").ok(),
        dns_ttl: env_integer("DNS_TTL", DEFAULT_DNS_TTL)?,
        task_expiration: Duration::seconds(env_integer(
            "TASK_EXPIRATION_SECONDS",
            DEFAULT_TASK_EXPIRATION_SECONDS,
        )?),
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = DynamoRecordsStore::new(aws_sdk_dynamodb::Client::new(&aws_config), table_name);
    let resolver = Ec2PublicIpResolver::new(aws_sdk_ec2::Client::new(&aws_config));
    let dns = Route53DnsUpdater::new(aws_sdk_route53::Client::new(&aws_config));

    handle_queue_event(&event.payload, &config, &store, &resolver, &dns, Utc::now())
        .map_err(|error| Error::from(error.message))
}

fn env_integer(name: &str, default: i64) -> Result<i64, Error> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| Error::from(format!("{name} must be an integer, got `{value}`"))),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
