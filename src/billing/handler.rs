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

use crate::billing::BillingModule;
use crate::common::dto::{GeneralError, HandlerResult, OkResponse, SimpleMessageResponse};
use crate::common::error::{FriendlyError, IntoFriendlyError};
use crate::tenants::dto::{DunningDashboard, PublicTenant};
use crate::tenants::lifecycle::LifecycleError;
use crate::tenants::model::LifecycleState;
use axum::body::Bytes;
use axum::debug_handler;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::Level;

/// Payment gateway notifications. Always answers 200 for a parseable body,
/// whatever the processing outcome: the gateway must never be driven into a
/// retry storm by our internal failures.
#[debug_handler]
pub async fn payments_webhook(
    State(billing_module): State<Arc<dyn BillingModule>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let signature = headers
        .get("X-Signature")
        .and_then(|value| value.to_str().ok());
    match billing_module.webhooks().ingest(&body, signature).await {
        Ok(_) => Ok(OkResponse::new(SimpleMessageResponse::new("accepted")).into_response()),
        Err(e) => Err(FriendlyError::user_facing(
            Level::DEBUG,
            StatusCode::BAD_REQUEST,
            file!(),
            GeneralError {
                message: format!("Unparseable webhook body: {e}"),
            },
        )
        .into_response()),
    }
}

#[debug_handler]
pub async fn dunning_tick(
    State(billing_module): State<Arc<dyn BillingModule>>,
) -> HandlerResult {
    match billing_module.dunning().tick().await {
        Ok(summary) => Ok(OkResponse::new(summary).into_response()),
        Err(e) => Err(e.into_friendly_error(billing_module).await.into_response()),
    }
}

#[debug_handler]
pub async fn dunning_dashboard(
    State(billing_module): State<Arc<dyn BillingModule>>,
) -> HandlerResult {
    let repo = billing_module.tenants_repo();
    let counts = match repo.count_by_state().await {
        Ok(counts) => counts,
        Err(e) => {
            return Err(LifecycleError::Repository(e)
                .into_friendly_error(billing_module)
                .await
                .into_response());
        }
    };
    let delinquent_states: Vec<String> = [
        LifecycleState::WarningSent,
        LifecycleState::Suspended,
        LifecycleState::FinalWarningSent,
        LifecycleState::ScheduledForDeletion,
    ]
    .iter()
    .map(|s| s.as_str().to_string())
    .collect();
    let delinquent: Vec<PublicTenant> = match repo.list_in_states(delinquent_states, 500, 0).await
    {
        Ok(tenants) => tenants.into_iter().map(PublicTenant::from).collect(),
        Err(e) => {
            return Err(LifecycleError::Repository(e)
                .into_friendly_error(billing_module)
                .await
                .into_response());
        }
    };
    Ok(OkResponse::new(DunningDashboard::from_counts(&counts, delinquent)).into_response())
}
