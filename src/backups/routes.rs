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
use crate::backups::BackupsModule;
use crate::backups::handler::{list as backups_list, restore as backups_restore, trigger as backups_trigger};
use crate::common::DefaultAppState;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn routes(app_state: Arc<DefaultAppState>) -> Router {
    let backups_module: Arc<dyn BackupsModule> = app_state.clone();
    Router::new()
        .route(
            "/system/tenants/{id}/backups",
            post(backups_trigger).get(backups_list),
        )
        .route(
            "/system/tenants/{id}/backups/{bid}/restore",
            post(backups_restore),
        )
        .layer(from_fn_with_state(app_state.config.clone(), require_admin))
        .with_state(backups_module)
}
