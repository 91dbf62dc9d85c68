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

use crate::backups::engine::BackupService;
use crate::backups::repository::BackupRecordsRepository;
use crate::common::{ConfigProvider, DefaultAppState, MailTransporter};
use std::sync::Arc;

pub(crate) mod engine;
pub(crate) mod handler;
pub(crate) mod model;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod storage;

pub trait BackupsModule: ConfigProvider + MailTransporter + Send + Sync {
    fn engine(&self) -> Arc<dyn BackupService>;
    fn records(&self) -> Arc<dyn BackupRecordsRepository>;
}

impl BackupsModule for DefaultAppState {
    fn engine(&self) -> Arc<dyn BackupService> {
        self.backups.clone()
    }
    fn records(&self) -> Arc<dyn BackupRecordsRepository> {
        self.pool_manager.clone()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::app::config::AppConfig;
    use async_trait::async_trait;
    use lettre::{
        Message,
        transport::smtp::{Error, response::Response},
    };
    use mockall::mock;

    mock!(
        pub BackupsModule {}
        impl ConfigProvider for BackupsModule {
            fn config(&self) -> Arc<AppConfig>;
        }
        #[async_trait]
        impl MailTransporter for BackupsModule {
            async fn send(&self, message: Message) -> Result<Response, Error>;
        }
        impl BackupsModule for BackupsModule {
            fn engine(&self) -> Arc<dyn BackupService>;
            fn records(&self) -> Arc<dyn BackupRecordsRepository>;
        }
    );
}
