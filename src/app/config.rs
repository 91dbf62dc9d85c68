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

use serde::Deserialize;

/// The `AppConfig` struct is the main application configuration model used
/// for deserializing and storing the configuration details for the different
/// components of the control plane.
///
/// It is loaded once at startup from `config/default` plus environment
/// overrides and shared behind an `Arc` through the `ConfigProvider` trait.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    server: ServerConfig,
    database: BasicDatabaseConfig,
    orchestrator: OrchestratorConfig,
    object_store: ObjectStoreConfig,
    gateway: GatewayConfig,
    dns: DnsConfig,
    mail: MailConfig,
    auth: AuthConfig,
    dunning: DunningConfig,
    bus: BusConfig,
    backup: BackupConfig,
    provision: ProvisionConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(true))
            .add_source(config::Environment::with_prefix("SITORA").separator("__"));
        builder.build()?.try_deserialize()
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }
    pub fn database(&self) -> &BasicDatabaseConfig {
        &self.database
    }
    pub fn orchestrator(&self) -> &OrchestratorConfig {
        &self.orchestrator
    }
    pub fn object_store(&self) -> &ObjectStoreConfig {
        &self.object_store
    }
    pub fn gateway(&self) -> &GatewayConfig {
        &self.gateway
    }
    pub fn dns(&self) -> &DnsConfig {
        &self.dns
    }
    pub fn mail(&self) -> &MailConfig {
        &self.mail
    }
    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }
    pub fn dunning(&self) -> &DunningConfig {
        &self.dunning
    }
    pub fn bus(&self) -> &BusConfig {
        &self.bus
    }
    pub fn backup(&self) -> &BackupConfig {
        &self.backup
    }
    pub fn provision(&self) -> &ProvisionConfig {
        &self.provision
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    host: String,
    port: u16,
    hostname: String,
}

impl ServerConfig {
    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicDatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: Option<u32>,
}

impl BasicDatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size.unwrap_or(5)
    }
}

/// Orchestrator API access. An empty `endpoint` selects the explicit
/// log-only mode of the driver.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    endpoint: String,
    token: String,
    tls_issuer: String,
    suspension_service: String,
}

impl OrchestratorConfig {
    pub fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(&self.endpoint)
        }
    }
    pub fn token(&self) -> &str {
        &self.token
    }
    pub fn tls_issuer(&self) -> &str {
        &self.tls_issuer
    }
    pub fn suspension_service(&self) -> &str {
        &self.suspension_service
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    endpoint: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    presign_expiry_secs: u64,
}

impl ObjectStoreConfig {
    pub fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(&self.endpoint)
        }
    }
    pub fn region(&self) -> &str {
        &self.region
    }
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
    pub fn access_key(&self) -> &str {
        &self.access_key
    }
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
    pub fn presign_expiry_secs(&self) -> u64 {
        self.presign_expiry_secs
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    base_url: String,
    api_key: String,
    webhook_secret: String,
}

impl GatewayConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
    pub fn webhook_secret(&self) -> Option<&str> {
        if self.webhook_secret.is_empty() {
            None
        } else {
            Some(&self.webhook_secret)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    endpoint: String,
    token: String,
    zone: String,
}

impl DnsConfig {
    pub fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(&self.endpoint)
        }
    }
    pub fn token(&self) -> &str {
        &self.token
    }
    pub fn zone(&self) -> &str {
        &self.zone
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    smtp_host: String,
    smtp_user: String,
    smtp_passwd: String,
    default_from: String,
    default_from_name: String,
    default_notification_email: String,
}

impl MailConfig {
    pub fn smtp_host(&self) -> &str {
        &self.smtp_host
    }
    pub fn smtp_user(&self) -> &str {
        &self.smtp_user
    }
    pub fn smtp_passwd(&self) -> &str {
        &self.smtp_passwd
    }
    pub fn default_from(&self) -> &str {
        &self.default_from
    }
    pub fn default_from_name(&self) -> &str {
        &self.default_from_name
    }
    pub fn default_notification_email(&self) -> &str {
        &self.default_notification_email
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    admin_token: String,
}

impl AuthConfig {
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DunningConfig {
    first_warning_days: i64,
    suspension_days: i64,
    final_warning_days: i64,
    deletion_days: i64,
    tick_interval_hours: u64,
    deletion_grace_hours: i64,
}

impl DunningConfig {
    pub fn first_warning_days(&self) -> i64 {
        self.first_warning_days
    }
    pub fn suspension_days(&self) -> i64 {
        self.suspension_days
    }
    pub fn final_warning_days(&self) -> i64 {
        self.final_warning_days
    }
    pub fn deletion_days(&self) -> i64 {
        self.deletion_days
    }
    pub fn tick_interval_hours(&self) -> u64 {
        self.tick_interval_hours
    }
    pub fn deletion_grace_hours(&self) -> i64 {
        self.deletion_grace_hours
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    queue_capacity: usize,
    max_age_hours: i64,
    workers: usize,
    handler_retries: u32,
}

impl BusConfig {
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
    pub fn max_age_hours(&self) -> i64 {
        self.max_age_hours
    }
    pub fn workers(&self) -> usize {
        self.workers
    }
    pub fn handler_retries(&self) -> u32 {
        self.handler_retries
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    include_uploads: bool,
    include_plugins: bool,
    include_themes: bool,
    php_version: String,
    mysql_version: String,
    cron_schedule: String,
}

impl BackupConfig {
    pub fn include_uploads(&self) -> bool {
        self.include_uploads
    }
    pub fn include_plugins(&self) -> bool {
        self.include_plugins
    }
    pub fn include_themes(&self) -> bool {
        self.include_themes
    }
    pub fn php_version(&self) -> &str {
        &self.php_version
    }
    pub fn mysql_version(&self) -> &str {
        &self.mysql_version
    }
    pub fn cron_schedule(&self) -> &str {
        &self.cron_schedule
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    step_timeout_secs: u64,
    exec_timeout_secs: u64,
    retry_attempts: u32,
    retry_cap_secs: u64,
}

impl ProvisionConfig {
    pub fn step_timeout_secs(&self) -> u64 {
        self.step_timeout_secs
    }
    pub fn exec_timeout_secs(&self) -> u64 {
        self.exec_timeout_secs
    }
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }
    pub fn retry_cap_secs(&self) -> u64 {
        self.retry_cap_secs
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Builds a complete configuration for unit tests without touching the
    /// filesystem.
    pub fn test_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                hostname: "panel.sitora.test".to_string(),
            },
            database: BasicDatabaseConfig {
                host: "127.0.0.1".to_string(),
                port: 5432,
                username: "sitora".to_string(),
                password: "sitora".to_string(),
                database: "sitora_test".to_string(),
                max_pool_size: Some(2),
            },
            orchestrator: OrchestratorConfig {
                endpoint: String::new(),
                token: String::new(),
                tls_issuer: "letsencrypt-staging".to_string(),
                suspension_service: "suspension-page".to_string(),
            },
            object_store: ObjectStoreConfig {
                endpoint: String::new(),
                region: "us-east-1".to_string(),
                bucket: "sitora-backups-test".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                presign_expiry_secs: 3600,
            },
            gateway: GatewayConfig {
                base_url: "https://api.sandbox.paygate.example/v3".to_string(),
                api_key: "test-key".to_string(),
                webhook_secret: "test-webhook-secret".to_string(),
            },
            dns: DnsConfig {
                endpoint: String::new(),
                token: String::new(),
                zone: "sitora.test".to_string(),
            },
            mail: MailConfig {
                smtp_host: "localhost".to_string(),
                smtp_user: String::new(),
                smtp_passwd: String::new(),
                default_from: "noreply@sitora.test".to_string(),
                default_from_name: "Sitora".to_string(),
                default_notification_email: "ops@sitora.test".to_string(),
            },
            auth: AuthConfig {
                admin_token: "test-admin-token".to_string(),
            },
            dunning: DunningConfig {
                first_warning_days: 3,
                suspension_days: 7,
                final_warning_days: 15,
                deletion_days: 30,
                tick_interval_hours: 24,
                deletion_grace_hours: 24,
            },
            bus: BusConfig {
                queue_capacity: 16,
                max_age_hours: 24,
                workers: 2,
                handler_retries: 3,
            },
            backup: BackupConfig {
                include_uploads: true,
                include_plugins: true,
                include_themes: true,
                php_version: "8.2".to_string(),
                mysql_version: "8.0".to_string(),
                cron_schedule: "0 2 * * *".to_string(),
            },
            provision: ProvisionConfig {
                step_timeout_secs: 300,
                exec_timeout_secs: 120,
                retry_attempts: 5,
                retry_cap_secs: 30,
            },
        }
    }
}
