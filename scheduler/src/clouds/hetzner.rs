//! Hetzner Cloud adapter over the public REST API.

use super::keys::SshKey;
use super::CloudError;
use serde::Deserialize;
use serde_json::json;
use shared::config::HetznerCloudConfig;
use shared::utils::rnd_name;
use tracing::info;

const API_BASE: &str = "https://api.hetzner.cloud/v1";

#[derive(Debug, Deserialize)]
struct SshKeysResponse {
    ssh_keys: Vec<SshKeyObject>,
}

#[derive(Debug, Deserialize)]
struct SshKeyObject {
    id: i64,
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSshKeyResponse {
    ssh_key: SshKeyObject,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: Vec<ServerObject>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CreatedServerResponse {
    server: ServerObject,
}

#[derive(Debug, Deserialize)]
struct ServerObject {
    id: i64,
    public_net: PublicNet,
}

#[derive(Debug, Deserialize)]
struct PublicNet {
    ipv4: Option<Ipv4>,
}

#[derive(Debug, Deserialize)]
struct Ipv4 {
    ip: String,
}

fn api_error(message: impl Into<String>) -> CloudError {
    CloudError::Api {
        provider: "hetzner",
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

/// Find or upload the scheduler's public key, returning its provider id.
async fn ensure_ssh_key(
    http: &reqwest::Client,
    cfg: &HetznerCloudConfig,
    key: &SshKey,
) -> Result<i64, CloudError> {
    // The OpenSSH line carries a trailing comment the provider may rewrite;
    // compare only the algorithm and blob fields.
    let ours: Vec<&str> = key.public_openssh.split_whitespace().take(2).collect();

    let response = http
        .get(format!("{}/ssh_keys", API_BASE))
        .bearer_auth(&cfg.token)
        .send()
        .await?;
    let listing: SshKeysResponse = check(response).await?.json().await?;
    for existing in listing.ssh_keys {
        let theirs: Vec<&str> = existing.public_key.split_whitespace().take(2).collect();
        if theirs == ours {
            return Ok(existing.id);
        }
    }

    let response = http
        .post(format!("{}/ssh_keys", API_BASE))
        .bearer_auth(&cfg.token)
        .json(&json!({
            "name": key.name,
            "public_key": key.public_openssh,
        }))
        .send()
        .await?;
    let created: CreatedSshKeyResponse = check(response).await?.json().await?;
    Ok(created.ssh_key.id)
}

pub async fn create_node(
    http: &reqwest::Client,
    cfg: &HetznerCloudConfig,
    key: &SshKey,
    user_data: &str,
) -> Result<String, CloudError> {
    let ssh_key_id = ensure_ssh_key(http, cfg, key).await?;

    let response = http
        .post(format!("{}/servers", API_BASE))
        .bearer_auth(&cfg.token)
        .json(&json!({
            "name": rnd_name("node"),
            "server_type": cfg.server_type,
            "image": cfg.image_name,
            "ssh_keys": [ssh_key_id],
            "user_data": user_data,
        }))
        .send()
        .await?;
    let created: CreatedServerResponse = check(response).await?.json().await?;
    let ip = created
        .server
        .public_net
        .ipv4
        .map(|v| v.ip)
        .ok_or_else(|| api_error("created server has no public IPv4 address"))?;
    info!("Created hetzner node {}", ip);
    Ok(ip)
}

async fn find_server(
    http: &reqwest::Client,
    cfg: &HetznerCloudConfig,
    host: &str,
) -> Result<Option<i64>, CloudError> {
    let mut page = 1u32;
    loop {
        let response = http
            .get(format!("{}/servers?page={}&per_page=50", API_BASE, page))
            .bearer_auth(&cfg.token)
            .send()
            .await?;
        let listing: ServersResponse = check(response).await?.json().await?;
        for server in &listing.servers {
            let ip = server.public_net.ipv4.as_ref().map(|v| v.ip.as_str());
            if ip == Some(host) {
                return Ok(Some(server.id));
            }
        }
        match listing.meta.and_then(|m| m.pagination).and_then(|p| p.next_page) {
            Some(next) => page = next,
            None => return Ok(None),
        }
    }
}

pub async fn delete_node(
    http: &reqwest::Client,
    cfg: &HetznerCloudConfig,
    host: &str,
) -> Result<(), CloudError> {
    match find_server(http, cfg, host).await? {
        Some(id) => {
            let response = http
                .delete(format!("{}/servers/{}", API_BASE, id))
                .bearer_auth(&cfg.token)
                .send()
                .await?;
            check(response).await?;
            info!("Deleted hetzner node {}", host);
        }
        None => info!("Hetzner node {} not deleted as unknown", host),
    }
    Ok(())
}
