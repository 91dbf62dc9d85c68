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

use crate::app::handlers::DomainEventHandler;
use crate::common::DefaultAppState;
use crate::common::dto::OkResponse;
use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

pub fn init_subscriber() {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::INFO) //TODO: make configurable
            .finish(),
    )
    .expect("setting default subscriber failed");
}

/// Builds the application: state, migrations, retention rules, event
/// handlers, bus workers, the dunning loop and the router. Returns the
/// dunning task handle so shutdown can stop it first.
pub async fn init_default_app()
-> Result<(Arc<DefaultAppState>, Router, JoinHandle<()>)> {
    let app_state = Arc::new(DefaultAppState::new().await?);
    app_state.migrator.migrate_main_db().await?;

    // Retention is enforced by the object store; a failure to install the
    // rules must not keep the control plane down.
    if let Err(e) = app_state.backups.install_retention_rules().await {
        error!("Could not install object store retention rules: {e}");
    }

    Arc::new(DomainEventHandler::new(
        app_state.lifecycle.clone(),
        app_state.pool_manager.clone(),
        app_state.pool_manager.clone(),
    ))
    .register(&app_state.bus);
    app_state.bus.start(app_state.config.bus().workers());

    let dunning_task = tokio::spawn(app_state.dunning.clone().run_loop());

    let router = Router::new()
        .merge(crate::tenants::routes::routes(app_state.clone()))
        .merge(crate::billing::routes::routes(app_state.clone()))
        .merge(crate::backups::routes::routes(app_state.clone()))
        .merge(
            Router::new()
                .route("/healthz", get(healthz))
                .with_state(app_state.clone()),
        )
        .layer(TraceLayer::new_for_http());

    Ok((app_state, router, dunning_task))
}

/// Liveness: 200 while the bus workers are alive.
async fn healthz(State(app_state): State<Arc<DefaultAppState>>) -> Response {
    if app_state.bus.is_live() {
        OkResponse::new(json!({
            "status": "ok",
            "counters": app_state.counters.snapshot(),
        }))
        .into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "bus workers are down").into_response()
    }
}

/// Ordered shutdown: dunning first, then the bus drains, the external
/// clients go away with the process.
pub async fn shutdown(app_state: &DefaultAppState, dunning_task: JoinHandle<()>) {
    dunning_task.abort();
    let _ = dunning_task.await;
    app_state.bus.shutdown().await;
}
