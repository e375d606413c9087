use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub trait PublicIpResolver {
    /// Map ENI ids to their current public IPv4 address. Interfaces
    /// without a public address are simply absent from the result.
    fn public_ipv4s(&self, eni_ids: &[String]) -> Result<BTreeMap<String, Ipv4Addr>, String>;
}

pub struct Ec2PublicIpResolver {
    client: aws_sdk_ec2::Client,
}

impl Ec2PublicIpResolver {
    pub fn new(client: aws_sdk_ec2::Client) -> Self {
        Self { client }
    }
}

impl PublicIpResolver for Ec2PublicIpResolver {
    fn public_ipv4s(&self, eni_ids: &[String]) -> Result<BTreeMap<String, Ipv4Addr>, String> {
        if eni_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let client = self.client.clone();
        let eni_ids = eni_ids.to_vec();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .describe_network_interfaces()
                    .set_network_interface_ids(Some(eni_ids))
                    .send()
                    .await
                    .map_err(|error| format!("failed to describe network interfaces: {error}"))?;

                let mut addresses = BTreeMap::new();
                for interface in output.network_interfaces() {
                    let Some(eni_id) = interface.network_interface_id() else {
                        continue;
                    };
                    let Some(public_ip) =
                        interface.association().and_then(|assoc| assoc.public_ip())
                    else {
                        continue;
                    };
                    let parsed = public_ip.parse().map_err(|_| {
                        format!(
                            "network interface {eni_id} reports malformed public address `{public_ip}`"
                        )
                    })?;
                    addresses.insert(eni_id.to_string(), parsed);
                }

                Ok(addresses)
            })
        })
    }
}
