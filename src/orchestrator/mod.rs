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
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub(crate) mod http;
pub(crate) mod logonly;

pub use http::HttpOrchestrator;
pub use logonly::LogOnlyOrchestrator;

/// Object names are derived from the tenant id and never change for the
/// lifetime of the tenant. Every other component addresses orchestrator
/// objects exclusively through these helpers.
pub fn namespace_for(tenant_id: &str) -> String {
    format!("client-{tenant_id}")
}
pub fn wordpress_deployment(tenant_id: &str) -> String {
    format!("wp-{tenant_id}")
}
pub fn database_deployment(tenant_id: &str) -> String {
    format!("db-{tenant_id}")
}
pub fn database_secret(tenant_id: &str) -> String {
    format!("db-{tenant_id}-credentials")
}
pub fn wordpress_secret(tenant_id: &str) -> String {
    format!("wp-{tenant_id}-credentials")
}
pub fn proxy_config(tenant_id: &str) -> String {
    format!("proxy-{tenant_id}-config")
}
pub fn tls_secret(tenant_id: &str) -> String {
    format!("{tenant_id}-tls")
}
pub fn backup_cron(tenant_id: &str) -> String {
    format!("backup-{tenant_id}")
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Orchestrator rejected the credentials: {0}")]
    PermanentAuth(String),

    #[error("Transient orchestrator API failure: {0}")]
    TransientApi(String),

    #[error("Permanent orchestrator API failure: {0}")]
    Permanent(String),

    #[error("{0} did not become ready before the deadline")]
    ProvisionTimeout(String),

    #[error("Command exited with status {status}")]
    ExecNonZero { status: i32, stderr: String },

    #[error("No pod matched selector {0}")]
    PodNotFound(String),
}

impl Retryable for DriverError {
    fn is_transient(&self) -> bool {
        matches!(self, DriverError::TransientApi(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Reference to a workload whose readiness can be awaited.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

/// The two pods the control plane ever execs into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PodTarget {
    WordPress,
    Database,
}

impl PodTarget {
    pub fn deployment(&self, tenant_id: &str) -> String {
        match self {
            PodTarget::WordPress => wordpress_deployment(tenant_id),
            PodTarget::Database => database_deployment(tenant_id),
        }
    }
}

/// Database bootstrap credentials handed to the orchestrator as secret data.
/// The `Debug` representation is redacted: credentials must never reach the
/// log, including through error context.
#[derive(Clone)]
pub struct DatabaseInit {
    pub root_password: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DatabaseInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseInit")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("root_password", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Environment wired into the WordPress deployment.
#[derive(Clone)]
pub struct WordPressEnv {
    pub db_host: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
}

impl fmt::Debug for WordPressEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordPressEnv")
            .field("db_host", &self.db_host)
            .field("db_user", &self.db_user)
            .field("db_name", &self.db_name)
            .field("db_password", &"<redacted>")
            .finish()
    }
}

/// Captured output of an in-pod command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn ensure_success(self) -> DriverResult<ExecOutput> {
        if self.status == 0 {
            Ok(self)
        } else {
            Err(DriverError::ExecNonZero {
                status: self.status,
                stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            })
        }
    }
    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// The only component that speaks the orchestrator protocol. Every `ensure_*`
/// operation is idempotent by the name derived from the tenant id: it reads
/// first, creates only when absent and patches only when the desired state
/// differs from the observed one.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrchestratorDriver: Send + Sync {
    async fn ensure_namespace(&self, tenant_id: &str) -> DriverResult<String>;

    async fn ensure_secret(
        &self,
        tenant_id: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> DriverResult<String>;

    async fn ensure_config(
        &self,
        tenant_id: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> DriverResult<String>;

    async fn ensure_database_deployment(
        &self,
        tenant_id: &str,
        creds: DatabaseInit,
    ) -> DriverResult<WorkloadRef>;

    async fn ensure_wordpress_deployment(
        &self,
        tenant_id: &str,
        domain: &str,
        env: WordPressEnv,
    ) -> DriverResult<WorkloadRef>;

    async fn wait_ready(&self, reference: WorkloadRef, deadline: Duration) -> DriverResult<()>;

    async fn ensure_ingress(
        &self,
        tenant_id: &str,
        domain: &str,
        tls_secret: &str,
    ) -> DriverResult<String>;

    /// Points the tenant ingress at a different backend service. Used to
    /// swap the site for the static suspension page and back.
    async fn set_ingress_backend(
        &self,
        tenant_id: &str,
        service: &str,
        port: u16,
    ) -> DriverResult<()>;

    async fn scale_deployment(
        &self,
        tenant_id: &str,
        name: &str,
        replicas: u32,
    ) -> DriverResult<()>;

    async fn ensure_backup_cron(&self, tenant_id: &str, schedule: &str) -> DriverResult<()>;

    async fn delete_namespace(&self, tenant_id: &str) -> DriverResult<()>;

    async fn exec_in_pod(
        &self,
        tenant_id: &str,
        target: PodTarget,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
        deadline: Duration,
    ) -> DriverResult<ExecOutput>;
}

/// Writes `bytes` to `remote_path` inside the target pod. The transfer is
/// framed over exec stdin, base64 encoded, so it survives the JSON transport.
pub async fn copy_to_pod(
    driver: &dyn OrchestratorDriver,
    tenant_id: &str,
    target: PodTarget,
    remote_path: &str,
    bytes: &[u8],
    deadline: Duration,
) -> DriverResult<()> {
    let encoded = BASE64.encode(bytes);
    driver
        .exec_in_pod(
            tenant_id,
            target,
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("base64 -d > {remote_path}"),
            ],
            Some(encoded.into_bytes()),
            deadline,
        )
        .await?
        .ensure_success()?;
    Ok(())
}

/// Reads `remote_path` from the target pod, base64 framed like
/// [`copy_to_pod`].
pub async fn copy_from_pod(
    driver: &dyn OrchestratorDriver,
    tenant_id: &str,
    target: PodTarget,
    remote_path: &str,
    deadline: Duration,
) -> DriverResult<Vec<u8>> {
    let output = driver
        .exec_in_pod(
            tenant_id,
            target,
            vec!["base64".to_string(), remote_path.to_string()],
            None,
            deadline,
        )
        .await?
        .ensure_success()?;
    let compact: Vec<u8> = output
        .stdout
        .into_iter()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(compact)
        .map_err(|e| DriverError::Permanent(format!("invalid base64 from pod: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derived_names_are_stable() {
        assert_eq!(namespace_for("padariarosa_a1b2c3"), "client-padariarosa_a1b2c3");
        assert_eq!(wordpress_deployment("padariarosa_a1b2c3"), "wp-padariarosa_a1b2c3");
        assert_eq!(database_deployment("padariarosa_a1b2c3"), "db-padariarosa_a1b2c3");
        assert_eq!(backup_cron("padariarosa_a1b2c3"), "backup-padariarosa_a1b2c3");
    }

    #[test]
    fn test_exec_output_nonzero_maps_to_exec_error() {
        let output = ExecOutput {
            status: 2,
            stdout: vec![],
            stderr: b"boom".to_vec(),
        };
        match output.ensure_success() {
            Err(DriverError::ExecNonZero { status, stderr }) => {
                assert_eq!(status, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let init = DatabaseInit {
            root_password: "super-secret-root".to_string(),
            user: "wp_padariarosa_a1b2c3".to_string(),
            password: "super-secret".to_string(),
            database: "wordpress_padariarosa_a1b2c3".to_string(),
        };
        let rendered = format!("{init:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_copy_round_trip_through_mock_driver() {
        let mut driver = MockOrchestratorDriver::new();
        driver
            .expect_exec_in_pod()
            .times(1)
            .withf(|_, _, command, stdin, _| {
                command[2].contains("base64 -d > /tmp/payload") && stdin.is_some()
            })
            .returning(|_, _, _, _, _| Ok(ExecOutput::default()));
        copy_to_pod(
            &driver,
            "padariarosa_a1b2c3",
            PodTarget::WordPress,
            "/tmp/payload",
            b"hello",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut driver = MockOrchestratorDriver::new();
        driver.expect_exec_in_pod().times(1).returning(|_, _, _, _, _| {
            Ok(ExecOutput {
                status: 0,
                stdout: BASE64.encode(b"hello").into_bytes(),
                stderr: vec![],
            })
        });
        let bytes = copy_from_pod(
            &driver,
            "padariarosa_a1b2c3",
            PodTarget::WordPress,
            "/tmp/payload",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"hello");
    }
}
