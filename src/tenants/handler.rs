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

use crate::common::dto::{GeneralError, HandlerResult, OkResponse, SimpleMessageResponse};
use crate::common::error::{FriendlyError, IntoFriendlyError};
use crate::tenants::TenantsModule;
use crate::tenants::dto::{
    ProvisionRequest, ProvisionRequestHelper, ProvisionResponse, PublicTenant,
};
use crate::tenants::lifecycle::LifecycleError;
use axum::Json;
use axum::debug_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::Level;

#[debug_handler]
pub async fn provision(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    Json(payload): Json<ProvisionRequestHelper>,
) -> HandlerResult {
    let request = match ProvisionRequest::try_from(payload) {
        Ok(request) => request,
        Err(e) => return Err(e.into_response()),
    };
    match tenants_module.provisioner().execute(request).await {
        Ok(outcome) => Ok(OkResponse::with_status(
            StatusCode::CREATED,
            ProvisionResponse {
                tenant: PublicTenant::from(outcome.tenant),
                credentials: outcome.credentials,
            },
        )),
        Err(e) => Err(e.into_friendly_error(tenants_module).await.into_response()),
    }
}

#[debug_handler]
pub async fn force_delete(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    Path(id): Path<String>,
) -> HandlerResult {
    match tenants_module.lifecycle().force_delete(&id).await {
        Ok(()) => Ok(OkResponse::new(SimpleMessageResponse::new(
            "Tenant deletion completed",
        ))
        .into_response()),
        Err(e) => Err(e.into_friendly_error(tenants_module).await.into_response()),
    }
}

#[debug_handler]
pub async fn get(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    Path(id): Path<String>,
) -> HandlerResult {
    match tenants_module.tenants_repo().get_by_id(&id).await {
        Ok(tenant) => Ok(OkResponse::new(PublicTenant::from(tenant)).into_response()),
        Err(e) if e.is_not_found() => Err(FriendlyError::user_facing(
            Level::DEBUG,
            StatusCode::NOT_FOUND,
            file!(),
            GeneralError {
                message: format!("Tenant {id} does not exist"),
            },
        )
        .into_response()),
        Err(e) => Err(LifecycleError::Repository(e)
            .into_friendly_error(tenants_module)
            .await
            .into_response()),
    }
}
