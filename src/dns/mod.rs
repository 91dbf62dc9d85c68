/*
 * This file is part of the Sitora hosting platform.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::common::retry::Retryable;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Transient DNS provider failure: {0}")]
    Transient(String),

    #[error("DNS provider rejected the request: {0}")]
    Permanent(String),
}

impl Retryable for DnsError {
    fn is_transient(&self) -> bool {
        matches!(self, DnsError::Transient(_))
    }
}

pub type DnsResult<T> = Result<T, DnsError>;

/// Thin client for the DNS provider. Records point tenant domains at the
/// ingress; deleting a tenant removes its record.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn upsert_record(&self, fqdn: &str, target: &str) -> DnsResult<()>;
    async fn delete_record(&self, fqdn: &str) -> DnsResult<()>;
}

/// HTTP implementation against the provider's record API. When no endpoint
/// is configured the composition root installs [`LogOnlyDns`] instead.
pub struct HttpDnsClient {
    endpoint: String,
    token: String,
    zone: String,
    http: reqwest::Client,
}

impl HttpDnsClient {
    pub fn new(endpoint: &str, token: &str, zone: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            zone: zone.to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> DnsResult<()> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(30));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DnsError::Transient(format!("{path}: {e}")))?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status if status.is_server_error() => {
                Err(DnsError::Transient(format!("{path} returned {status}")))
            }
            status => Err(DnsError::Permanent(format!("{path} returned {status}"))),
        }
    }
}

#[async_trait]
impl DnsClient for HttpDnsClient {
    async fn upsert_record(&self, fqdn: &str, target: &str) -> DnsResult<()> {
        self.request(
            Method::PUT,
            &format!("/zones/{}/records/{fqdn}", self.zone),
            Some(json!({ "type": "CNAME", "name": fqdn, "content": target, "ttl": 300 })),
        )
        .await?;
        info!("DNS record for {fqdn} points at {target}");
        Ok(())
    }

    async fn delete_record(&self, fqdn: &str) -> DnsResult<()> {
        self.request(
            Method::DELETE,
            &format!("/zones/{}/records/{fqdn}", self.zone),
            None,
        )
        .await?;
        info!("DNS record for {fqdn} removed");
        Ok(())
    }
}

/// Log-only stand-in used when no DNS provider is configured.
pub struct LogOnlyDns;

#[async_trait]
impl DnsClient for LogOnlyDns {
    async fn upsert_record(&self, fqdn: &str, target: &str) -> DnsResult<()> {
        info!("[log-only] would point DNS record {fqdn} at {target}");
        Ok(())
    }

    async fn delete_record(&self, fqdn: &str) -> DnsResult<()> {
        info!("[log-only] would delete DNS record {fqdn}");
        Ok(())
    }
}
