//! Upcloud adapter over the public REST API.

use super::keys::SshKey;
use super::CloudError;
use serde::Deserialize;
use serde_json::json;
use shared::config::UpcloudCloudConfig;
use shared::utils::rnd_name;
use std::time::Duration;
use tracing::info;

const API_BASE: &str = "https://api.upcloud.com/1.3";
const ZONE: &str = "uk-lon1";
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STOP_POLL_ATTEMPTS: usize = 60;

fn api_error(message: impl Into<String>) -> CloudError {
    CloudError::Api {
        provider: "upcloud",
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
struct TemplatesResponse {
    storages: StorageList,
}

#[derive(Debug, Deserialize)]
struct StorageList {
    storage: Vec<StorageObject>,
}

#[derive(Debug, Deserialize)]
struct StorageObject {
    title: String,
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct ServerDetailsResponse {
    server: ServerDetails,
}

#[derive(Debug, Deserialize)]
struct ServerDetails {
    uuid: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ip_addresses: Option<IpAddressList>,
}

#[derive(Debug, Deserialize)]
struct IpAddressList {
    ip_address: Vec<IpAddress>,
}

#[derive(Debug, Deserialize)]
struct IpAddress {
    access: String,
    family: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: ServerList,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    server: Vec<ServerSummary>,
}

#[derive(Debug, Deserialize)]
struct ServerSummary {
    uuid: String,
}

fn public_ipv4(details: &ServerDetails) -> Option<String> {
    details.ip_addresses.as_ref().and_then(|list| {
        list.ip_address
            .iter()
            .find(|a| a.access == "public" && a.family == "IPv4")
            .map(|a| a.address.clone())
    })
}

/// Pick the Debian template storage used for new servers.
async fn find_template(
    http: &reqwest::Client,
    cfg: &UpcloudCloudConfig,
) -> Result<String, CloudError> {
    let response = http
        .get(format!("{}/storage/template", API_BASE))
        .basic_auth(&cfg.login, Some(&cfg.password))
        .send()
        .await?;
    let templates: TemplatesResponse = check(response).await?.json().await?;
    templates
        .storages
        .storage
        .iter()
        .find(|s| s.title.contains("Debian GNU/Linux 10"))
        .map(|s| s.uuid.clone())
        .ok_or_else(|| api_error("no Debian 10 template available"))
}

pub async fn create_node(
    http: &reqwest::Client,
    cfg: &UpcloudCloudConfig,
    key: &SshKey,
    user_data: &str,
) -> Result<String, CloudError> {
    let template = find_template(http, cfg).await?;
    let name = rnd_name("node");

    let response = http
        .post(format!("{}/server", API_BASE))
        .basic_auth(&cfg.login, Some(&cfg.password))
        .json(&json!({
            "server": {
                "zone": ZONE,
                "title": name,
                "hostname": name,
                "core_number": "8",
                "memory_amount": "4096",
                "storage_devices": {
                    "storage_device": [{
                        "action": "clone",
                        "storage": template,
                        "title": format!("{}-disk", name),
                        "size": 40,
                        "tier": "maxiops",
                    }],
                },
                "login_user": {
                    "username": cfg.username,
                    "create_password": "no",
                    "ssh_keys": { "ssh_key": [key.public_openssh] },
                },
                "user_data": user_data,
            },
        }))
        .send()
        .await?;
    let details: ServerDetailsResponse = check(response).await?.json().await?;
    let ip = public_ipv4(&details.server)
        .ok_or_else(|| api_error("created server has no public IPv4 address"))?;
    info!("Created upcloud node {}", ip);
    Ok(ip)
}

async fn get_server(
    http: &reqwest::Client,
    cfg: &UpcloudCloudConfig,
    uuid: &str,
) -> Result<ServerDetails, CloudError> {
    let response = http
        .get(format!("{}/server/{}", API_BASE, uuid))
        .basic_auth(&cfg.login, Some(&cfg.password))
        .send()
        .await?;
    let details: ServerDetailsResponse = check(response).await?.json().await?;
    Ok(details.server)
}

async fn find_server(
    http: &reqwest::Client,
    cfg: &UpcloudCloudConfig,
    host: &str,
) -> Result<Option<ServerDetails>, CloudError> {
    let response = http
        .get(format!("{}/server", API_BASE))
        .basic_auth(&cfg.login, Some(&cfg.password))
        .send()
        .await?;
    let listing: ServersResponse = check(response).await?.json().await?;
    for summary in listing.servers.server {
        let details = get_server(http, cfg, &summary.uuid).await?;
        if public_ipv4(&details).as_deref() == Some(host) {
            return Ok(Some(details));
        }
    }
    Ok(None)
}

pub async fn delete_node(
    http: &reqwest::Client,
    cfg: &UpcloudCloudConfig,
    host: &str,
) -> Result<(), CloudError> {
    let Some(server) = find_server(http, cfg, host).await? else {
        info!("Upcloud node {} not deleted as unknown", host);
        return Ok(());
    };

    if server.state != "stopped" {
        let response = http
            .post(format!("{}/server/{}/stop", API_BASE, server.uuid))
            .basic_auth(&cfg.login, Some(&cfg.password))
            .json(&json!({"stop_server": {"stop_type": "hard"}}))
            .send()
            .await?;
        check(response).await?;

        // The server must be fully stopped before deletion is accepted.
        let mut stopped = false;
        for _ in 0..STOP_POLL_ATTEMPTS {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
            if get_server(http, cfg, &server.uuid).await?.state == "stopped" {
                stopped = true;
                break;
            }
        }
        if !stopped {
            return Err(api_error(format!("server {} did not stop", server.uuid)));
        }
    }

    let response = http
        .delete(format!("{}/server/{}?storages=1", API_BASE, server.uuid))
        .basic_auth(&cfg.login, Some(&cfg.password))
        .send()
        .await?;
    check(response).await?;
    info!("Deleted upcloud node {}", host);
    Ok(())
}
