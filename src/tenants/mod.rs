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

use crate::common::{ConfigProvider, DefaultAppState, MailTransporter};
use crate::tenants::lifecycle::LifecycleStateMachine;
use crate::tenants::provisioner::Provisioner;
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;

pub(crate) mod dto;
pub(crate) mod handler;
pub(crate) mod hooks;
pub(crate) mod lifecycle;
pub(crate) mod model;
pub(crate) mod provisioner;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod types;

pub trait TenantsModule: ConfigProvider + MailTransporter + Send + Sync {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
    fn provisioner(&self) -> Arc<Provisioner>;
    fn lifecycle(&self) -> Arc<LifecycleStateMachine>;
}

impl TenantsModule for DefaultAppState {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository> {
        self.pool_manager.clone()
    }
    fn provisioner(&self) -> Arc<Provisioner> {
        self.provisioner.clone()
    }
    fn lifecycle(&self) -> Arc<LifecycleStateMachine> {
        self.lifecycle.clone()
    }
}
