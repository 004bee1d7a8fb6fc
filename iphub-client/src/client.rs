use std::net::{IpAddr, UdpSocket};
use anyhow::{anyhow, Context, Result};
use reqwest::{Response, StatusCode, Url};
use shared::protocol::{DIGEST_PATH, LIST_PATH, REMOVE_PATH, REPORT_PATH, RESOLVE_PATH};
use shared::types::{DeviceList, DeviceRecord, ErrorBody, ReportRequest, ReportResponse};

/// Thin HTTP client for the registry API
pub struct RegistryClient {
    http: reqwest::Client,
    base: Url,
}

impl RegistryClient {
    pub fn new(server: &str) -> Result<Self> {
        let mut base = Url::parse(server)
            .with_context(|| format!("Invalid server URL: {}", server))?;

        // Endpoints resolve under the base path, so it must end in a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Failed to build URL for {}", path))
    }

    pub async fn report(&self, hostname: &str, address: &str) -> Result<DeviceRecord> {
        let body = ReportRequest {
            hostname: Some(hostname.to_string()),
            address: Some(address.to_string()),
        };

        let response = self
            .http
            .post(self.endpoint(REPORT_PATH)?)
            .json(&body)
            .send()
            .await
            .context("Failed to reach registry")?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let resp: ReportResponse = response
            .json()
            .await
            .context("Failed to decode report response")?;
        Ok(resp.record)
    }

    /// `Ok(None)` when the registry has never heard of `hostname`
    pub async fn resolve(&self, hostname: &str) -> Result<Option<DeviceRecord>> {
        let response = self
            .http
            .get(self.endpoint(RESOLVE_PATH)?)
            .query(&[("hostname", hostname)])
            .send()
            .await
            .context("Failed to reach registry")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response
                    .json()
                    .await
                    .context("Failed to decode device record")?,
            )),
            _ => Err(error_from(response).await),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.endpoint(LIST_PATH)?)
            .send()
            .await
            .context("Failed to reach registry")?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let list: DeviceList = response
            .json()
            .await
            .context("Failed to decode device list")?;
        Ok(list.devices)
    }

    /// Returns false if the hostname was not registered
    pub async fn remove(&self, hostname: &str) -> Result<bool> {
        let response = self
            .http
            .delete(self.endpoint(REMOVE_PATH)?)
            .query(&[("hostname", hostname)])
            .send()
            .await
            .context("Failed to reach registry")?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(error_from(response).await),
        }
    }

    pub async fn digest(&self) -> Result<String> {
        let response = self
            .http
            .get(self.endpoint(DIGEST_PATH)?)
            .send()
            .await
            .context("Failed to reach registry")?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        response.text().await.context("Failed to read digest")
    }
}

async fn error_from(response: Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody { error, details: Some(details) }) => {
            anyhow!("{} ({}): {}", error, status, details)
        }
        Ok(ErrorBody { error, details: None }) => anyhow!("{} ({})", error, status),
        Err(_) => anyhow!("Registry returned {}", status),
    }
}

/// The local address the OS would use to reach `server`.
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_address_towards(server: &Url) -> Result<IpAddr> {
    let target = server
        .socket_addrs(|| Some(80))
        .with_context(|| format!("Failed to resolve {}", server))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("{} did not resolve to any address", server))?;

    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).context("Failed to open UDP socket")?;
    socket
        .connect(target)
        .with_context(|| format!("No route to {}", target))?;

    Ok(socket.local_addr()?.ip())
}
