//! Token metadata retrieval over HTTP and IPFS gateways.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::TokenMetadata;

const IPFS_SCHEME: &str = "ipfs://";

/// Rewrite `ipfs://` URIs onto an HTTP gateway. Other URIs pass through.
pub fn resolve_uri(uri: &str, gateway: &str) -> String {
    let uri = uri.trim();
    match uri.strip_prefix(IPFS_SCHEME) {
        Some(path) => {
            let path = path.strip_prefix("ipfs/").unwrap_or(path);
            if gateway.ends_with('/') {
                format!("{gateway}{path}")
            } else {
                format!("{gateway}/{path}")
            }
        }
        None => uri.to_string(),
    }
}

/// Decode an inline `data:application/json` URI.
pub fn decode_data_uri(uri: &str) -> Result<TokenMetadata> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::metadata(uri, "not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::metadata(uri, "data URI has no payload"))?;

    if !header.starts_with("application/json") {
        return Err(Error::metadata(uri, format!("unsupported media type {header:?}")));
    }

    let bytes = if header.ends_with(";base64") {
        STANDARD
            .decode(payload)
            .map_err(|e| Error::metadata(uri, format!("bad base64: {e}")))?
    } else {
        payload.as_bytes().to_vec()
    };

    serde_json::from_slice(&bytes).map_err(|e| Error::metadata(uri, e.to_string()))
}

pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, uri: &str) -> impl Future<Output = Result<TokenMetadata>> + Send;
}

/// Fetches metadata through a configured IPFS gateway.
pub struct GatewayClient {
    http: reqwest::Client,
    gateway: String,
}

impl GatewayClient {
    pub fn new(gateway: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            gateway: gateway.to_string(),
        })
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }
}

impl MetadataFetcher for GatewayClient {
    async fn fetch(&self, uri: &str) -> Result<TokenMetadata> {
        if uri.starts_with("data:") {
            return decode_data_uri(uri);
        }

        let url = resolve_uri(uri, &self.gateway);
        debug!(%url, "fetching token metadata");

        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::metadata(&url, format!("gateway returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.contains("json") {
            return Err(Error::metadata(&url, "token URI returned HTML, not JSON"));
        }

        response
            .json::<TokenMetadata>()
            .await
            .map_err(|e| Error::metadata(&url, e.to_string()))
    }
}
