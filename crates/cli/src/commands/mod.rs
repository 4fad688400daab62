//! Command handlers for the admin CLI.
//!
//! Admin credentials are read from `CGC_USER` / `CGC_PASSWORD`; all admin
//! calls go through the gateway's `/admin/v1` surface over HTTP Basic.

use anyhow::{anyhow, bail, Context, Result};
use chaingate_core::keys::generate_key_pair;
use serde_json::json;

fn admin_credentials() -> Result<(String, String)> {
    let user = std::env::var("CGC_USER").context("CGC_USER is not set")?;
    let password = std::env::var("CGC_PASSWORD").context("CGC_PASSWORD is not set")?;
    Ok((user, password))
}

async fn post_admin(url: &str, path: &str, body: serde_json::Value) -> Result<()> {
    let (user, password) = admin_credentials()?;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/admin/v1/{}", url.trim_end_matches('/'), path))
        .basic_auth(&user, Some(&password))
        .json(&body)
        .send()
        .await
        .context("admin request failed")?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let text = response.text().await.unwrap_or_default();
        bail!("admin request rejected: status {status}: {text}");
    }
    Ok(())
}

pub fn handle_gen() -> Result<()> {
    let pair = generate_key_pair();
    println!("access_key: {}", pair.access_key);
    println!("secret_key: {}", pair.secret_key);
    Ok(())
}

pub async fn handle_secret_put(
    url: &str,
    access_key: String,
    secret_key: String,
    group: String,
    service: String,
    allow_origins: String,
    route_rules: String,
) -> Result<()> {
    if !route_rules.is_empty() {
        serde_json::from_str::<serde_json::Value>(&route_rules)
            .map_err(|e| anyhow!("route_rules is not valid JSON: {e}"))?;
    }
    post_admin(
        url,
        "secret",
        json!({
            "access_key": access_key,
            "secret_key": secret_key,
            "group": group,
            "service": service,
            "allow_origins": allow_origins,
            "allow_ips": "",
            "route_rules": route_rules,
        }),
    )
    .await?;
    println!("secret key {} saved", mask(&access_key));
    Ok(())
}

pub async fn handle_config_put(url: &str, module: String, key: String, value: String) -> Result<()> {
    post_admin(url, "config", json!({ "module": module, "key": key, "value": value })).await?;
    println!("config {module}/{key} saved");
    Ok(())
}

pub async fn handle_ready_put(
    url: &str,
    chain_id: String,
    source: String,
    rpc: String,
    protocol: &str,
) -> Result<()> {
    if protocol != "jsonrpc" && protocol != "grpc" {
        bail!("protocol must be jsonrpc or grpc");
    }
    post_admin(
        url,
        "upstream/ready",
        json!([{ "chain_id": chain_id, "source": source, "rpc": rpc, "protocol": protocol }]),
    )
    .await?;
    println!("ready upstream {source}/{chain_id} saved");
    Ok(())
}

pub async fn handle_check(url: &str, chain_id: &str, access_key: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/v1/{}/{}", url.trim_end_matches('/'), chain_id, access_key))
        .send()
        .await
        .context("gateway request failed")?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status != reqwest::StatusCode::OK {
        bail!("gateway returned status {status}: {text}");
    }

    let urls: Vec<String> = serde_json::from_str(&text).context("unexpected list response")?;
    for url in urls {
        println!("{url}");
    }
    Ok(())
}

fn mask(access_key: &str) -> String {
    if access_key.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &access_key[..4], &access_key[access_key.len() - 4..])
}
