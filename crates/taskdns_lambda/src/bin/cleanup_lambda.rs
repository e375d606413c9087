use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use taskdns_lambda::adapters::dns_update::Route53DnsUpdater;
use taskdns_lambda::handlers::cleanup::{handle_cleanup_event, CleanupResponse};

async fn handle_request(event: LambdaEvent<Value>) -> Result<CleanupResponse, Error> {
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dns = Route53DnsUpdater::new(aws_sdk_route53::Client::new(&aws_config));

    handle_cleanup_event(&event.payload, &dns).map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}
