//! Azure adapter over the Resource Manager REST API.
//!
//! The resource sequence mirrors what the VM deployment template of the
//! original service setup produces: a static public IP, a NIC wired to the
//! configured vnet/subnet/NSG, and a Linux VM with the scheduler's public
//! key and cloud-init custom data. Resources share a random name prefix so
//! deletion can walk them in dependency order (VM, NIC, public IP) given
//! only the address.

use super::keys::SshKey;
use super::user_data::CloudUserData;
use super::CloudError;
use serde::Deserialize;
use serde_json::json;
use shared::config::AzureCloudConfig;
use shared::utils::rnd_lowercase;
use std::time::Duration;
use tracing::{info, warn};

const MGMT_BASE: &str = "https://management.azure.com";
const NETWORK_API: &str = "2022-09-01";
const COMPUTE_API: &str = "2023-03-01";
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const POLL_ATTEMPTS: usize = 60;

fn api_error(message: impl Into<String>) -> CloudError {
    CloudError::Api {
        provider: "az",
        message: message.into(),
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, CloudError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(api_error(format!("HTTP {}: {}", status, body)))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client-credentials token for the management plane.
async fn get_token(
    http: &reqwest::Client,
    cfg: &AzureCloudConfig,
) -> Result<String, CloudError> {
    let url = format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        cfg.tenant_id
    );
    let response = http
        .post(url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("scope", "https://management.azure.com/.default"),
        ])
        .send()
        .await?;
    let token: TokenResponse = check(response).await?.json().await?;
    Ok(token.access_token)
}

fn rg_base(cfg: &AzureCloudConfig) -> String {
    format!(
        "{}/subscriptions/{}/resourceGroups/{}/providers",
        MGMT_BASE, cfg.subscription_id, cfg.resource_group
    )
}

fn subnet_id(cfg: &AzureCloudConfig) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
        cfg.subscription_id, cfg.resource_group, cfg.vnet, cfg.subnet
    )
}

fn nsg_id(cfg: &AzureCloudConfig) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
        cfg.subscription_id, cfg.resource_group, cfg.nsg
    )
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    id: String,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PublicIpListResponse {
    value: Vec<PublicIpObject>,
}

#[derive(Debug, Deserialize)]
struct PublicIpObject {
    name: String,
    #[serde(default)]
    properties: serde_json::Value,
}

struct ImageReference {
    publisher: String,
    offer: String,
    sku: String,
    version: String,
}

fn parse_image_urn(urn: &str) -> Result<ImageReference, CloudError> {
    let parts: Vec<&str> = urn.splitn(4, ':').collect();
    if parts.len() < 4 {
        return Err(api_error(format!(
            "image URN '{}' should be in publisher:offer:sku:version format",
            urn
        )));
    }
    Ok(ImageReference {
        publisher: parts[0].to_string(),
        offer: parts[1].to_string(),
        sku: parts[2].to_string(),
        version: parts[3].to_string(),
    })
}

async fn put_resource(
    http: &reqwest::Client,
    token: &str,
    url: &str,
    body: serde_json::Value,
) -> Result<ResourceResponse, CloudError> {
    let response = http
        .put(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await?;
    let resource: ResourceResponse = check(response).await?.json().await?;
    Ok(resource)
}

async fn wait_provisioned(
    http: &reqwest::Client,
    token: &str,
    url: &str,
) -> Result<serde_json::Value, CloudError> {
    for _ in 0..POLL_ATTEMPTS {
        let response = http.get(url).bearer_auth(token).send().await?;
        let resource: ResourceResponse = check(response).await?.json().await?;
        match resource.properties["provisioningState"].as_str() {
            Some("Succeeded") => return Ok(resource.properties),
            Some("Failed") => {
                return Err(api_error(format!("provisioning failed for {}", resource.id)))
            }
            _ => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
    Err(api_error(format!("provisioning timed out for {}", url)))
}

pub async fn create_node(
    http: &reqwest::Client,
    cfg: &AzureCloudConfig,
    key: &SshKey,
    user_data: &CloudUserData,
) -> Result<String, CloudError> {
    let token = get_token(http, cfg).await?;
    let base = rg_base(cfg);
    let prefix = format!("yavm-{}", rnd_lowercase(8));
    let image = parse_image_urn(&cfg.image_urn)?;

    // The walinuxagent apt unit races cloud-init's package phase.
    let mut data = user_data.clone();
    data.bootcmd
        .insert(0, "systemctl mask waagent-apt.service".to_string());

    let pip_url = format!(
        "{}/Microsoft.Network/publicIPAddresses/{}-pip?api-version={}",
        base, prefix, NETWORK_API
    );
    let pip = put_resource(
        http,
        &token,
        &pip_url,
        json!({
            "location": cfg.location,
            "sku": {"name": "Standard"},
            "properties": {"publicIPAllocationMethod": "Static"},
        }),
    )
    .await?;
    wait_provisioned(http, &token, &pip_url).await?;

    let nic_url = format!(
        "{}/Microsoft.Network/networkInterfaces/{}-nic?api-version={}",
        base, prefix, NETWORK_API
    );
    let nic = put_resource(
        http,
        &token,
        &nic_url,
        json!({
            "location": cfg.location,
            "properties": {
                "ipConfigurations": [{
                    "name": "primary",
                    "properties": {
                        "subnet": {"id": subnet_id(cfg)},
                        "publicIPAddress": {"id": pip.id},
                    },
                }],
                "networkSecurityGroup": {"id": nsg_id(cfg)},
            },
        }),
    )
    .await?;
    wait_provisioned(http, &token, &nic_url).await?;

    let vm_url = format!(
        "{}/Microsoft.Compute/virtualMachines/{}?api-version={}",
        base, prefix, COMPUTE_API
    );
    put_resource(
        http,
        &token,
        &vm_url,
        json!({
            "location": cfg.location,
            "properties": {
                "hardwareProfile": {"vmSize": cfg.vm_size},
                "storageProfile": {
                    "imageReference": {
                        "publisher": image.publisher,
                        "offer": image.offer,
                        "sku": image.sku,
                        "version": image.version,
                    },
                    "osDisk": {
                        "createOption": "FromImage",
                        "deleteOption": "Delete",
                        "managedDisk": {"storageAccountType": "Standard_LRS"},
                    },
                },
                "osProfile": {
                    "computerName": prefix,
                    "adminUsername": cfg.username,
                    "customData": data.render_base64(),
                    "linuxConfiguration": {
                        "disablePasswordAuthentication": true,
                        "ssh": {
                            "publicKeys": [{
                                "path": format!("/home/{}/.ssh/authorized_keys", cfg.username),
                                "keyData": key.public_openssh,
                            }],
                        },
                    },
                },
                "networkProfile": {
                    "networkInterfaces": [{
                        "id": nic.id,
                        "properties": {"deleteOption": "Delete"},
                    }],
                },
            },
        }),
    )
    .await?;
    wait_provisioned(http, &token, &vm_url).await?;

    let response = http.get(&pip_url).bearer_auth(&token).send().await?;
    let pip: ResourceResponse = check(response).await?.json().await?;
    let ip = pip.properties["ipAddress"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| api_error("VM created without a public IP address"))?;
    info!("Created azure node {}", ip);
    Ok(ip)
}

async fn delete_resource(
    http: &reqwest::Client,
    token: &str,
    url: &str,
) -> Result<(), CloudError> {
    let response = http.delete(url).bearer_auth(token).send().await?;
    // 204 means the resource was already gone.
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(api_error(format!("HTTP {}: {}", status, body)));
    }
    Ok(())
}

async fn wait_deleted(http: &reqwest::Client, token: &str, url: &str) -> Result<(), CloudError> {
    for _ in 0..POLL_ATTEMPTS {
        let response = http.get(url).bearer_auth(token).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(api_error(format!("deletion timed out for {}", url)))
}

pub async fn delete_node(
    http: &reqwest::Client,
    cfg: &AzureCloudConfig,
    host: &str,
) -> Result<(), CloudError> {
    let token = get_token(http, cfg).await?;
    let base = rg_base(cfg);

    let response = http
        .get(format!(
            "{}/Microsoft.Network/publicIPAddresses?api-version={}",
            base, NETWORK_API
        ))
        .bearer_auth(&token)
        .send()
        .await?;
    let listing: PublicIpListResponse = check(response).await?.json().await?;
    let Some(pip) = listing
        .value
        .iter()
        .find(|p| p.properties["ipAddress"].as_str() == Some(host))
    else {
        warn!("Azure public IP {} not found, nothing to delete", host);
        return Ok(());
    };
    let Some(prefix) = pip.name.strip_suffix("-pip") else {
        warn!("Azure public IP {} has an unexpected name {}", host, pip.name);
        return Ok(());
    };

    // Dependency order: the VM releases its NIC, the NIC its public IP.
    let vm_url = format!(
        "{}/Microsoft.Compute/virtualMachines/{}?api-version={}",
        base, prefix, COMPUTE_API
    );
    delete_resource(http, &token, &vm_url).await?;
    wait_deleted(http, &token, &vm_url).await?;

    let nic_url = format!(
        "{}/Microsoft.Network/networkInterfaces/{}-nic?api-version={}",
        base, prefix, NETWORK_API
    );
    delete_resource(http, &token, &nic_url).await?;
    wait_deleted(http, &token, &nic_url).await?;

    let pip_url = format!(
        "{}/Microsoft.Network/publicIPAddresses/{}-pip?api-version={}",
        base, prefix, NETWORK_API
    );
    delete_resource(http, &token, &pip_url).await?;
    info!("Deleted azure node {}", host);
    Ok(())
}
