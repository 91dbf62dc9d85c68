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

use crate::billing::dunning::DunningScheduler;
use crate::billing::repository::InvoicesRepository;
use crate::billing::webhook::WebhookIngestor;
use crate::common::{ConfigProvider, DefaultAppState, MailTransporter};
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;

pub(crate) mod dunning;
pub(crate) mod handler;
pub(crate) mod model;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod webhook;

pub trait BillingModule: ConfigProvider + MailTransporter + Send + Sync {
    fn webhooks(&self) -> Arc<WebhookIngestor>;
    fn dunning(&self) -> Arc<DunningScheduler>;
    fn invoices_repo(&self) -> Arc<dyn InvoicesRepository>;
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
}

impl BillingModule for DefaultAppState {
    fn webhooks(&self) -> Arc<WebhookIngestor> {
        self.webhooks.clone()
    }
    fn dunning(&self) -> Arc<DunningScheduler> {
        self.dunning.clone()
    }
    fn invoices_repo(&self) -> Arc<dyn InvoicesRepository> {
        self.pool_manager.clone()
    }
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository> {
        self.pool_manager.clone()
    }
}
