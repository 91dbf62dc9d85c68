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
use crate::billing::BillingModule;
use crate::billing::handler::{dunning_dashboard, dunning_tick, payments_webhook};
use crate::common::DefaultAppState;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn routes(app_state: Arc<DefaultAppState>) -> Router {
    let billing_module: Arc<dyn BillingModule> = app_state.clone();

    // The webhook endpoint authenticates through the HMAC signature, not
    // the admin token.
    let webhook = Router::new()
        .route("/system/webhooks/payments", post(payments_webhook))
        .with_state(billing_module.clone());

    let admin = Router::new()
        .route("/system/dunning/tick", post(dunning_tick))
        .route("/system/dunning/dashboard", get(dunning_dashboard))
        .layer(from_fn_with_state(app_state.config.clone(), require_admin))
        .with_state(billing_module);

    webhook.merge(admin)
}
