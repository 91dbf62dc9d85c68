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

use crate::auth::middleware::require_admin;
use crate::common::DefaultAppState;
use crate::tenants::TenantsModule;
use crate::tenants::handler::{
    force_delete as tenants_force_delete, get as tenants_get, provision as tenants_provision,
};
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn routes(app_state: Arc<DefaultAppState>) -> Router {
    let tenants_module: Arc<dyn TenantsModule> = app_state.clone();
    Router::new()
        .route("/system/tenants", post(tenants_provision))
        .route(
            "/system/tenants/{id}",
            get(tenants_get).delete(tenants_force_delete),
        )
        .layer(from_fn_with_state(app_state.config.clone(), require_admin))
        .with_state(tenants_module)
}
