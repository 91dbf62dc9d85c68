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

use crate::common::retry::{BackoffPolicy, Retryable, retry_with_backoff};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

pub(crate) mod model;

pub use model::{
    CustomerRequest, GatewayCustomer, GatewayInvoice, GatewaySubscription, SubscriptionRequest,
    SubscriptionUpdate,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transient gateway failure: {0}")]
    Transient(String),

    #[error("Gateway rejected the request: {0}")]
    Permanent(String),

    #[error("Payment gateway API key is not configured")]
    NotConfigured,
}

impl Retryable for GatewayError {
    fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// The narrow slice of the billing API the control plane consumes. Retries on
/// transient failures happen inside the implementation; callers see either a
/// result or a terminal error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, request: CustomerRequest) -> GatewayResult<GatewayCustomer>;

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<GatewaySubscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<()>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> GatewayResult<GatewaySubscription>;

    async fn list_overdue_invoices(
        &self,
        subscription_id: &str,
    ) -> GatewayResult<Vec<GatewayInvoice>>;

    async fn get_invoice(&self, invoice_id: &str) -> GatewayResult<GatewayInvoice>;

    /// Verifies the HMAC-SHA-256 signature of a raw webhook body. Returns
    /// `true` when no webhook secret is configured.
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;
}

/// HTTP implementation against the gateway's JSON API. Authentication uses
/// the gateway's `access_token` header convention.
pub struct HttpPaymentGateway {
    base_url: String,
    api_key: String,
    webhook_secret: Option<String>,
    http: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, api_key: &str, webhook_secret: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            webhook_secret: webhook_secret.map(str::to_string),
            http: reqwest::Client::new(),
            backoff: BackoffPolicy::gateway(),
        }
    }

    async fn request_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<T> {
        if self.api_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("access_token", &self.api_key)
            .timeout(Duration::from_secs(30));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("{path}: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transient(format!("{path} returned {status}")));
        }
        if status.is_client_error() {
            return Err(GatewayError::Permanent(format!("{path} returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Permanent(format!("{path}: invalid body: {e}")))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> GatewayResult<T> {
        retry_with_backoff(&self.backoff, path, || {
            self.request_once(method.clone(), path, body.as_ref())
        })
        .await
    }
}

#[derive(serde::Deserialize)]
struct Page<T> {
    data: Vec<T>,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_customer(&self, request: CustomerRequest) -> GatewayResult<GatewayCustomer> {
        let body = serde_json::to_value(&request)
            .map_err(|e| GatewayError::Permanent(e.to_string()))?;
        self.request(Method::POST, "/customers", Some(body)).await
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<GatewaySubscription> {
        let body = serde_json::to_value(&request)
            .map_err(|e| GatewayError::Permanent(e.to_string()))?;
        self.request(Method::POST, "/subscriptions", Some(body))
            .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<()> {
        let _: Value = self
            .request(
                Method::DELETE,
                &format!("/subscriptions/{subscription_id}"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> GatewayResult<GatewaySubscription> {
        let body =
            serde_json::to_value(&update).map_err(|e| GatewayError::Permanent(e.to_string()))?;
        self.request(
            Method::PUT,
            &format!("/subscriptions/{subscription_id}"),
            Some(body),
        )
        .await
    }

    async fn list_overdue_invoices(
        &self,
        subscription_id: &str,
    ) -> GatewayResult<Vec<GatewayInvoice>> {
        let page: Page<GatewayInvoice> = self
            .request(
                Method::GET,
                &format!("/payments?subscription={subscription_id}&status=OVERDUE"),
                None,
            )
            .await?;
        Ok(page.data)
    }

    async fn get_invoice(&self, invoice_id: &str) -> GatewayResult<GatewayInvoice> {
        self.request(Method::GET, &format!("/payments/{invoice_id}"), None)
            .await
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        let Some(secret) = &self.webhook_secret else {
            return true;
        };
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(body);
        mac.verify_slice(&provided).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let gateway = HttpPaymentGateway::new("https://gw.test", "key", Some("shhh"));
        let body = br#"{"event":"PAYMENT_CONFIRMED"}"#;
        assert!(gateway.verify_webhook_signature(body, &sign("shhh", body)));
    }

    #[test]
    fn test_forged_signature_is_rejected() {
        let gateway = HttpPaymentGateway::new("https://gw.test", "key", Some("shhh"));
        let body = br#"{"event":"PAYMENT_CONFIRMED"}"#;
        assert!(!gateway.verify_webhook_signature(body, "deadbeef"));
        assert!(!gateway.verify_webhook_signature(body, "zz-not-hex"));
        assert!(!gateway.verify_webhook_signature(body, &sign("other-secret", body)));
    }

    #[test]
    fn test_missing_secret_skips_verification() {
        let gateway = HttpPaymentGateway::new("https://gw.test", "key", None);
        assert!(gateway.verify_webhook_signature(b"anything", "deadbeef"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transient("503".into()).is_transient());
        assert!(!GatewayError::Permanent("401".into()).is_transient());
        assert!(!GatewayError::NotConfigured.is_transient());
    }
}
