use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::ArmClient;

const API_VERSION: &str = "2023-05-01";

// ============ Virtual networks ============

#[derive(Serialize)]
struct CreateVirtualNetworkRequest<'a> {
    location: &'a str,
    properties: VirtualNetworkProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualNetworkProperties<'a> {
    address_space: AddressSpace<'a>,
    subnets: Vec<SubnetRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressSpace<'a> {
    address_prefixes: Vec<&'a str>,
}

#[derive(Serialize)]
struct SubnetRequest<'a> {
    name: &'static str,
    properties: SubnetProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties<'a> {
    address_prefix: &'a str,
}

#[derive(Deserialize)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    properties: VirtualNetworkRead,
}

#[derive(Deserialize)]
struct VirtualNetworkRead {
    #[serde(default)]
    subnets: Vec<SubnetRead>,
}

#[derive(Deserialize)]
struct SubnetRead {
    id: String,
}

impl VirtualNetwork {
    /// Resource id of the first (only) subnet
    pub fn subnet_id(&self) -> Result<&str> {
        self.properties
            .subnets
            .first()
            .map(|s| s.id.as_str())
            .ok_or_else(|| anyhow!("virtual network '{}' has no subnets", self.name))
    }
}

// ============ Public IP addresses ============

#[derive(Serialize)]
struct CreatePublicIpRequest<'a> {
    location: &'a str,
    properties: PublicIpProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpProperties<'a> {
    #[serde(rename = "publicIPAllocationMethod")]
    public_ip_allocation_method: &'static str,
    dns_settings: DnsSettings<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DnsSettings<'a> {
    domain_name_label: &'a str,
}

#[derive(Deserialize)]
pub struct PublicIpAddress {
    pub id: String,
    pub name: String,
    properties: PublicIpRead,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicIpRead {
    dns_settings: Option<DnsSettingsRead>,
}

#[derive(Deserialize)]
struct DnsSettingsRead {
    fqdn: Option<String>,
}

impl PublicIpAddress {
    pub fn fqdn(&self) -> Option<&str> {
        self.properties
            .dns_settings
            .as_ref()
            .and_then(|d| d.fqdn.as_deref())
    }
}

// ============ Network interfaces ============

#[derive(Serialize)]
struct CreateNetworkInterfaceRequest<'a> {
    location: &'a str,
    properties: NetworkInterfaceProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceProperties<'a> {
    ip_configurations: Vec<IpConfiguration<'a>>,
}

#[derive(Serialize)]
struct IpConfiguration<'a> {
    name: &'static str,
    properties: IpConfigurationProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IpConfigurationProperties<'a> {
    subnet: ResourceRef<'a>,
    #[serde(rename = "privateIPAllocationMethod")]
    private_ip_allocation_method: &'static str,
    #[serde(rename = "publicIPAddress", skip_serializing_if = "Option::is_none")]
    public_ip_address: Option<ResourceRef<'a>>,
}

#[derive(Serialize)]
struct ResourceRef<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
}

impl ArmClient {
    // ============ Virtual network methods ============

    /// Create a virtual network with a single subnet covering the address space
    pub async fn create_virtual_network(
        &self,
        rg: &str,
        name: &str,
        location: &str,
        address_space: &str,
    ) -> Result<VirtualNetwork> {
        let path = self.resource_group_path(
            rg,
            &format!("/providers/Microsoft.Network/virtualNetworks/{}", name),
        );
        let body = serde_json::to_value(CreateVirtualNetworkRequest {
            location,
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: vec![address_space],
                },
                subnets: vec![SubnetRequest {
                    name: "default",
                    properties: SubnetProperties {
                        address_prefix: address_space,
                    },
                }],
            },
        })?;
        self.put_and_wait(&path, API_VERSION, body).await?;

        let resp = self.get_json(&path, API_VERSION).await?;
        Ok(serde_json::from_value(resp)?)
    }

    // ============ Public IP methods ============

    /// Create a dynamically allocated public IP with a DNS label
    pub async fn create_public_ip(
        &self,
        rg: &str,
        name: &str,
        location: &str,
        dns_label: &str,
    ) -> Result<PublicIpAddress> {
        let path = self.resource_group_path(
            rg,
            &format!("/providers/Microsoft.Network/publicIPAddresses/{}", name),
        );
        let body = serde_json::to_value(CreatePublicIpRequest {
            location,
            properties: PublicIpProperties {
                public_ip_allocation_method: "Dynamic",
                dns_settings: DnsSettings {
                    domain_name_label: dns_label,
                },
            },
        })?;
        self.put_and_wait(&path, API_VERSION, body).await?;

        let resp = self.get_json(&path, API_VERSION).await?;
        Ok(serde_json::from_value(resp)?)
    }

    // ============ Network interface methods ============

    /// Create a network interface with a dynamic private IP, optionally bound
    /// to a public IP
    pub async fn create_network_interface(
        &self,
        rg: &str,
        name: &str,
        location: &str,
        subnet_id: &str,
        public_ip_id: Option<&str>,
    ) -> Result<NetworkInterface> {
        let path = self.resource_group_path(
            rg,
            &format!("/providers/Microsoft.Network/networkInterfaces/{}", name),
        );
        let body = serde_json::to_value(CreateNetworkInterfaceRequest {
            location,
            properties: NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: "primary",
                    properties: IpConfigurationProperties {
                        subnet: ResourceRef { id: subnet_id },
                        private_ip_allocation_method: "Dynamic",
                        public_ip_address: public_ip_id.map(|id| ResourceRef { id }),
                    },
                }],
            },
        })?;
        self.put_and_wait(&path, API_VERSION, body).await?;

        let resp = self.get_json(&path, API_VERSION).await?;
        Ok(serde_json::from_value(resp)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn virtual_network_body_shape() {
        let body = serde_json::to_value(CreateVirtualNetworkRequest {
            location: "westus",
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: vec!["10.0.0.0/28"],
                },
                subnets: vec![SubnetRequest {
                    name: "default",
                    properties: SubnetProperties {
                        address_prefix: "10.0.0.0/28",
                    },
                }],
            },
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "location": "westus",
                "properties": {
                    "addressSpace": { "addressPrefixes": ["10.0.0.0/28"] },
                    "subnets": [
                        { "name": "default", "properties": { "addressPrefix": "10.0.0.0/28" } }
                    ]
                }
            })
        );
    }

    #[test]
    fn public_ip_body_shape() {
        let body = serde_json::to_value(CreatePublicIpRequest {
            location: "westus",
            properties: PublicIpProperties {
                public_ip_allocation_method: "Dynamic",
                dns_settings: DnsSettings {
                    domain_name_label: "pip1234",
                },
            },
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "location": "westus",
                "properties": {
                    "publicIPAllocationMethod": "Dynamic",
                    "dnsSettings": { "domainNameLabel": "pip1234" }
                }
            })
        );
    }

    #[test]
    fn nic_body_includes_public_ip_only_when_present() {
        let with_pip = serde_json::to_value(CreateNetworkInterfaceRequest {
            location: "westus",
            properties: NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: "primary",
                    properties: IpConfigurationProperties {
                        subnet: ResourceRef { id: "/sub/.../default" },
                        private_ip_allocation_method: "Dynamic",
                        public_ip_address: Some(ResourceRef { id: "/sub/.../pip" }),
                    },
                }],
            },
        })
        .unwrap();
        assert_eq!(
            with_pip["properties"]["ipConfigurations"][0]["properties"]["publicIPAddress"]["id"],
            "/sub/.../pip"
        );

        let without_pip = serde_json::to_value(CreateNetworkInterfaceRequest {
            location: "westus",
            properties: NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: "primary",
                    properties: IpConfigurationProperties {
                        subnet: ResourceRef { id: "/sub/.../default" },
                        private_ip_allocation_method: "Dynamic",
                        public_ip_address: None,
                    },
                }],
            },
        })
        .unwrap();
        assert!(without_pip["properties"]["ipConfigurations"][0]["properties"]
            .get("publicIPAddress")
            .is_none());
    }

    #[test]
    fn subnet_id_of_first_subnet() {
        let vnet: VirtualNetwork = serde_json::from_value(json!({
            "id": "/sub/rg/vnet1",
            "name": "vnet1",
            "properties": { "subnets": [ { "id": "/sub/rg/vnet1/subnets/default" } ] }
        }))
        .unwrap();
        assert_eq!(vnet.subnet_id().unwrap(), "/sub/rg/vnet1/subnets/default");
    }

    #[test]
    fn subnet_id_errors_when_empty() {
        let vnet: VirtualNetwork = serde_json::from_value(json!({
            "id": "/sub/rg/vnet1",
            "name": "vnet1",
            "properties": {}
        }))
        .unwrap();
        assert!(vnet.subnet_id().is_err());
    }
}
