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

use super::{
    DatabaseInit, DriverError, DriverResult, ExecOutput, OrchestratorDriver, PodTarget,
    WordPressEnv, WorkloadRef, backup_cron, database_deployment, database_secret, namespace_for,
    wordpress_deployment,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Driver implementation speaking the orchestrator's REST API over JSON.
/// Authentication is a bearer token; every object lives in the namespace
/// derived from the tenant id.
pub struct HttpOrchestrator {
    base: String,
    token: String,
    tls_issuer: String,
    suspension_service: String,
    http: reqwest::Client,
}

enum ApiOutcome {
    Ok(Value),
    NotFound,
    Conflict,
}

impl HttpOrchestrator {
    pub fn new(endpoint: &str, token: &str, tls_issuer: &str, suspension_service: &str) -> Self {
        Self {
            base: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            tls_issuer: tls_issuer.to_string(),
            suspension_service: suspension_service.to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> DriverResult<ApiOutcome> {
        let url = format!("{}{}", self.base, path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(30));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DriverError::TransientApi(format!("{path}: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DriverError::PermanentAuth(
                format!("{path} returned {}", response.status()),
            )),
            StatusCode::NOT_FOUND => Ok(ApiOutcome::NotFound),
            StatusCode::CONFLICT => Ok(ApiOutcome::Conflict),
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => Err(
                DriverError::TransientApi(format!("{path} returned {status}")),
            ),
            status if status.is_client_error() => Err(DriverError::Permanent(format!(
                "{path} returned {status}"
            ))),
            _ => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| DriverError::TransientApi(format!("{path}: {e}")))?;
                if text.is_empty() {
                    Ok(ApiOutcome::Ok(Value::Null))
                } else {
                    serde_json::from_str(&text)
                        .map(ApiOutcome::Ok)
                        .map_err(|e| DriverError::Permanent(format!("{path}: invalid body: {e}")))
                }
            }
        }
    }

    /// Read-then-write idempotence shared by all `ensure_*` operations: the
    /// object is created when absent and patched only when the desired
    /// manifest is not already a subset of the observed one.
    async fn ensure_object(
        &self,
        collection: &str,
        name: &str,
        manifest: &Value,
    ) -> DriverResult<()> {
        let object_path = format!("{collection}/{name}");
        match self.request(Method::GET, &object_path, None).await? {
            ApiOutcome::NotFound => {
                match self.request(Method::POST, collection, Some(manifest)).await? {
                    // Lost a creation race; the object exists, which is what
                    // we wanted.
                    ApiOutcome::Conflict => Ok(()),
                    ApiOutcome::NotFound => Err(DriverError::Permanent(format!(
                        "collection {collection} does not exist"
                    ))),
                    ApiOutcome::Ok(_) => {
                        info!("Created orchestrator object {object_path}");
                        Ok(())
                    }
                }
            }
            ApiOutcome::Ok(observed) => {
                if json_subset(manifest, &observed) {
                    debug!("Orchestrator object {object_path} already up to date");
                    Ok(())
                } else {
                    self.request(Method::PATCH, &object_path, Some(manifest))
                        .await?;
                    info!("Patched orchestrator object {object_path}");
                    Ok(())
                }
            }
            ApiOutcome::Conflict => Ok(()),
        }
    }

    async fn find_pod(&self, tenant_id: &str, target: PodTarget) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        let selector = format!("app%3D{}", target.deployment(tenant_id));
        let path = format!("/api/v1/namespaces/{namespace}/pods?labelSelector={selector}");
        match self.request(Method::GET, &path, None).await? {
            ApiOutcome::Ok(list) => list
                .pointer("/items/0/metadata/name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DriverError::PodNotFound(selector.replace("%3D", "="))),
            _ => Err(DriverError::PodNotFound(selector.replace("%3D", "="))),
        }
    }
}

/// Returns whether every leaf of `desired` is present with the same value in
/// `observed`.
fn json_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(desired_map), Value::Object(observed_map)) => {
            desired_map.iter().all(|(key, value)| {
                observed_map
                    .get(key)
                    .is_some_and(|observed_value| json_subset(value, observed_value))
            })
        }
        (Value::Array(desired_items), Value::Array(observed_items)) => {
            desired_items.len() == observed_items.len()
                && desired_items
                    .iter()
                    .zip(observed_items.iter())
                    .all(|(d, o)| json_subset(d, o))
        }
        (desired, observed) => desired == observed,
    }
}

fn namespace_manifest(tenant_id: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": namespace_for(tenant_id),
            "labels": { "tenant": tenant_id, "managed-by": "sitora" }
        }
    })
}

fn secret_manifest(namespace: &str, name: &str, data: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": namespace },
        "stringData": data
    })
}

fn config_manifest(namespace: &str, name: &str, data: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": namespace },
        "data": data
    })
}

fn volume_claim_manifest(namespace: &str, name: &str, size: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": size } }
        }
    })
}

fn service_manifest(namespace: &str, name: &str, port: u16) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "port": port, "targetPort": port }]
        }
    })
}

fn database_manifest(tenant_id: &str, init: &DatabaseInit) -> Value {
    let namespace = namespace_for(tenant_id);
    let name = database_deployment(tenant_id);
    let secret = database_secret(tenant_id);
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name, "tenant": tenant_id } },
                "spec": {
                    "containers": [{
                        "name": "mysql",
                        "image": "mysql:8.0",
                        "env": [
                            { "name": "MYSQL_ROOT_PASSWORD",
                              "valueFrom": { "secretKeyRef": { "name": secret, "key": "root-password" } } },
                            { "name": "MYSQL_USER",
                              "valueFrom": { "secretKeyRef": { "name": secret, "key": "username" } } },
                            { "name": "MYSQL_PASSWORD",
                              "valueFrom": { "secretKeyRef": { "name": secret, "key": "password" } } },
                            { "name": "MYSQL_DATABASE", "value": init.database }
                        ],
                        "ports": [{ "containerPort": 3306 }],
                        "volumeMounts": [{ "name": "data", "mountPath": "/var/lib/mysql" }]
                    }],
                    "volumes": [{
                        "name": "data",
                        "persistentVolumeClaim": { "claimName": format!("{name}-data") }
                    }]
                }
            }
        }
    })
}

fn wordpress_manifest(tenant_id: &str, env: &WordPressEnv) -> Value {
    let namespace = namespace_for(tenant_id);
    let name = wordpress_deployment(tenant_id);
    let secret = database_secret(tenant_id);
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name, "tenant": tenant_id } },
                "spec": {
                    "containers": [{
                        "name": "wordpress",
                        "image": "wordpress:6.5-apache",
                        "env": [
                            { "name": "WORDPRESS_DB_HOST", "value": env.db_host },
                            { "name": "WORDPRESS_DB_NAME", "value": env.db_name },
                            { "name": "WORDPRESS_DB_USER",
                              "valueFrom": { "secretKeyRef": { "name": secret, "key": "username" } } },
                            { "name": "WORDPRESS_DB_PASSWORD",
                              "valueFrom": { "secretKeyRef": { "name": secret, "key": "password" } } }
                        ],
                        "ports": [{ "containerPort": 80 }],
                        "volumeMounts": [{ "name": "content", "mountPath": "/var/www/html" }]
                    }],
                    "volumes": [{
                        "name": "content",
                        "persistentVolumeClaim": { "claimName": format!("{name}-content") }
                    }]
                }
            }
        }
    })
}

fn ingress_manifest(tenant_id: &str, domain: &str, tls_secret: &str, issuer: &str) -> Value {
    let namespace = namespace_for(tenant_id);
    let name = wordpress_deployment(tenant_id);
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": { "cert-manager.io/cluster-issuer": issuer }
        },
        "spec": {
            "tls": [{ "hosts": [domain], "secretName": tls_secret }],
            "rules": [{
                "host": domain,
                "http": {
                    "paths": [{
                        "path": "/",
                        "pathType": "Prefix",
                        "backend": { "service": { "name": name, "port": { "number": 80 } } }
                    }]
                }
            }]
        }
    })
}

fn backup_cron_manifest(tenant_id: &str, schedule: &str) -> Value {
    let namespace = namespace_for(tenant_id);
    json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": { "name": backup_cron(tenant_id), "namespace": namespace },
        "spec": {
            "schedule": schedule,
            "jobTemplate": {
                "spec": {
                    "template": {
                        "spec": {
                            "containers": [{
                                "name": "backup",
                                "image": "wordpress:cli",
                                "command": ["/bin/sh", "-c"],
                                "args": [
                                    "wp db export /backup/backup-$(date +%Y%m%d).sql && \
                                     tar -czf /backup/files-$(date +%Y%m%d).tar.gz /var/www/html/wp-content"
                                ],
                                "volumeMounts": [{ "name": "backup-storage", "mountPath": "/backup" }]
                            }],
                            "restartPolicy": "OnFailure",
                            "volumes": [{
                                "name": "backup-storage",
                                "persistentVolumeClaim": { "claimName": format!("backup-{tenant_id}-data") }
                            }]
                        }
                    }
                }
            }
        }
    })
}

#[async_trait]
impl OrchestratorDriver for HttpOrchestrator {
    async fn ensure_namespace(&self, tenant_id: &str) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        self.ensure_object(
            "/api/v1/namespaces",
            &namespace,
            &namespace_manifest(tenant_id),
        )
        .await?;
        Ok(namespace)
    }

    async fn ensure_secret(
        &self,
        tenant_id: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/secrets"),
            name,
            &secret_manifest(&namespace, name, &data),
        )
        .await?;
        Ok(name.to_string())
    }

    async fn ensure_config(
        &self,
        tenant_id: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/configmaps"),
            name,
            &config_manifest(&namespace, name, &data),
        )
        .await?;
        Ok(name.to_string())
    }

    async fn ensure_database_deployment(
        &self,
        tenant_id: &str,
        creds: DatabaseInit,
    ) -> DriverResult<WorkloadRef> {
        let namespace = namespace_for(tenant_id);
        let name = database_deployment(tenant_id);
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/persistentvolumeclaims"),
            &format!("{name}-data"),
            &volume_claim_manifest(&namespace, &format!("{name}-data"), "5Gi"),
        )
        .await?;
        self.ensure_object(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments"),
            &name,
            &database_manifest(tenant_id, &creds),
        )
        .await?;
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/services"),
            &name,
            &service_manifest(&namespace, &name, 3306),
        )
        .await?;
        Ok(WorkloadRef { namespace, name })
    }

    async fn ensure_wordpress_deployment(
        &self,
        tenant_id: &str,
        _domain: &str,
        env: WordPressEnv,
    ) -> DriverResult<WorkloadRef> {
        let namespace = namespace_for(tenant_id);
        let name = wordpress_deployment(tenant_id);
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/persistentvolumeclaims"),
            &format!("{name}-content"),
            &volume_claim_manifest(&namespace, &format!("{name}-content"), "10Gi"),
        )
        .await?;
        self.ensure_object(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments"),
            &name,
            &wordpress_manifest(tenant_id, &env),
        )
        .await?;
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/services"),
            &name,
            &service_manifest(&namespace, &name, 80),
        )
        .await?;
        Ok(WorkloadRef { namespace, name })
    }

    async fn wait_ready(&self, reference: WorkloadRef, deadline: Duration) -> DriverResult<()> {
        let started = Instant::now();
        let path = format!(
            "/apis/apps/v1/namespaces/{}/deployments/{}",
            reference.namespace, reference.name
        );
        loop {
            if let ApiOutcome::Ok(deployment) = self.request(Method::GET, &path, None).await? {
                let ready = deployment
                    .pointer("/status/readyReplicas")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if ready > 0 {
                    info!("Workload {} is ready", reference.name);
                    return Ok(());
                }
            }
            if started.elapsed() >= deadline {
                return Err(DriverError::ProvisionTimeout(reference.name));
            }
            tokio::time::sleep(READY_POLL_INTERVAL.min(deadline)).await;
        }
    }

    async fn ensure_ingress(
        &self,
        tenant_id: &str,
        domain: &str,
        tls_secret: &str,
    ) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        let name = wordpress_deployment(tenant_id);
        self.ensure_object(
            &format!("/apis/networking.k8s.io/v1/namespaces/{namespace}/ingresses"),
            &name,
            &ingress_manifest(tenant_id, domain, tls_secret, &self.tls_issuer),
        )
        .await?;
        Ok(name)
    }

    async fn set_ingress_backend(
        &self,
        tenant_id: &str,
        service: &str,
        port: u16,
    ) -> DriverResult<()> {
        let namespace = namespace_for(tenant_id);
        let name = wordpress_deployment(tenant_id);
        let patch = json!({
            "spec": {
                "rules": [{
                    "http": {
                        "paths": [{
                            "path": "/",
                            "pathType": "Prefix",
                            "backend": { "service": { "name": service, "port": { "number": port } } }
                        }]
                    }
                }]
            }
        });
        self.request(
            Method::PATCH,
            &format!("/apis/networking.k8s.io/v1/namespaces/{namespace}/ingresses/{name}"),
            Some(&patch),
        )
        .await?;
        info!("Ingress for {tenant_id} now routes to {service}:{port}");
        Ok(())
    }

    async fn scale_deployment(
        &self,
        tenant_id: &str,
        name: &str,
        replicas: u32,
    ) -> DriverResult<()> {
        let namespace = namespace_for(tenant_id);
        let patch = json!({ "spec": { "replicas": replicas } });
        self.request(
            Method::PATCH,
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}/scale"),
            Some(&patch),
        )
        .await?;
        info!("Scaled {name} in {namespace} to {replicas}");
        Ok(())
    }

    async fn ensure_backup_cron(&self, tenant_id: &str, schedule: &str) -> DriverResult<()> {
        let namespace = namespace_for(tenant_id);
        self.ensure_object(
            &format!("/api/v1/namespaces/{namespace}/persistentvolumeclaims"),
            &format!("backup-{tenant_id}-data"),
            &volume_claim_manifest(&namespace, &format!("backup-{tenant_id}-data"), "10Gi"),
        )
        .await?;
        self.ensure_object(
            &format!("/apis/batch/v1/namespaces/{namespace}/cronjobs"),
            &backup_cron(tenant_id),
            &backup_cron_manifest(tenant_id, schedule),
        )
        .await
    }

    async fn delete_namespace(&self, tenant_id: &str) -> DriverResult<()> {
        let namespace = namespace_for(tenant_id);
        match self
            .request(
                Method::DELETE,
                &format!("/api/v1/namespaces/{namespace}"),
                None,
            )
            .await?
        {
            // Already gone; deletion is idempotent.
            ApiOutcome::NotFound | ApiOutcome::Ok(_) | ApiOutcome::Conflict => {
                info!("Namespace {namespace} deleted");
                Ok(())
            }
        }
    }

    async fn exec_in_pod(
        &self,
        tenant_id: &str,
        target: PodTarget,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
        deadline: Duration,
    ) -> DriverResult<ExecOutput> {
        let namespace = namespace_for(tenant_id);
        let pod = self.find_pod(tenant_id, target).await?;
        let body = json!({
            "command": command,
            "stdin": stdin.map(|bytes| BASE64.encode(bytes)),
        });
        let exec = tokio::time::timeout(
            deadline,
            self.request(
                Method::POST,
                &format!("/api/v1/namespaces/{namespace}/pods/{pod}/exec"),
                Some(&body),
            ),
        )
        .await
        .map_err(|_| DriverError::TransientApi(format!("exec in {pod} exceeded deadline")))??;

        match exec {
            ApiOutcome::Ok(result) => {
                let decode = |field: &str| -> Vec<u8> {
                    result
                        .get(field)
                        .and_then(Value::as_str)
                        .and_then(|encoded| BASE64.decode(encoded).ok())
                        .unwrap_or_default()
                };
                Ok(ExecOutput {
                    status: result.get("status").and_then(Value::as_i64).unwrap_or(-1) as i32,
                    stdout: decode("stdout"),
                    stderr: decode("stderr"),
                })
            }
            _ => Err(DriverError::PodNotFound(pod)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_subset_matches_partial_objects() {
        let desired = json!({ "spec": { "replicas": 1 } });
        let observed = json!({ "spec": { "replicas": 1, "paused": false }, "status": {} });
        assert!(json_subset(&desired, &observed));

        let drifted = json!({ "spec": { "replicas": 0, "paused": false } });
        assert!(!json_subset(&desired, &drifted));
    }

    #[test]
    fn test_wordpress_manifest_never_embeds_the_password() {
        let manifest = wordpress_manifest(
            "padariarosa_a1b2c3",
            &WordPressEnv {
                db_host: "db-padariarosa_a1b2c3".to_string(),
                db_user: "wp_padariarosa_a1b2c3".to_string(),
                db_password: "super-secret".to_string(),
                db_name: "wordpress_padariarosa_a1b2c3".to_string(),
            },
        );
        assert!(!manifest.to_string().contains("super-secret"));
    }

    #[test]
    fn test_ingress_manifest_carries_domain_and_tls() {
        let manifest = ingress_manifest(
            "padariarosa_a1b2c3",
            "rosa.ex.com",
            "padariarosa_a1b2c3-tls",
            "letsencrypt-prod",
        );
        assert_eq!(
            manifest.pointer("/spec/rules/0/host").unwrap(),
            &json!("rosa.ex.com")
        );
        assert_eq!(
            manifest.pointer("/spec/tls/0/secretName").unwrap(),
            &json!("padariarosa_a1b2c3-tls")
        );
    }

    #[test]
    fn test_backup_cron_manifest_uses_schedule() {
        let manifest = backup_cron_manifest("padariarosa_a1b2c3", "0 2 * * *");
        assert_eq!(manifest.pointer("/spec/schedule").unwrap(), &json!("0 2 * * *"));
        assert_eq!(
            manifest.pointer("/metadata/name").unwrap(),
            &json!("backup-padariarosa_a1b2c3")
        );
    }
}
