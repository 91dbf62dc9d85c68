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

use crate::backups::BackupsModule;
use crate::backups::model::BackupKind;
use crate::common::dto::{GeneralError, HandlerResult, OkResponse, SimpleMessageResponse};
use crate::common::error::{FriendlyError, IntoFriendlyError};
use axum::Json;
use axum::debug_handler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;

#[derive(Debug, Deserialize, Default)]
pub struct BackupTriggerInput {
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreInput {
    #[serde(default = "default_true")]
    pub database: bool,
    #[serde(default = "default_true")]
    pub files: bool,
}

impl Default for RestoreInput {
    fn default() -> Self {
        Self {
            database: true,
            files: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[debug_handler]
pub async fn trigger(
    State(backups_module): State<Arc<dyn BackupsModule>>,
    Path(id): Path<String>,
    payload: Option<Json<BackupTriggerInput>>,
) -> HandlerResult {
    let requested = payload.and_then(|Json(input)| input.kind);
    let kind = match requested.as_deref() {
        None => BackupKind::Daily,
        Some(raw) => match BackupKind::from_str(raw) {
            Ok(kind) => kind,
            Err(e) => {
                return Err(FriendlyError::user_facing(
                    Level::DEBUG,
                    StatusCode::UNPROCESSABLE_ENTITY,
                    file!(),
                    GeneralError { message: e },
                )
                .into_response());
            }
        },
    };
    match backups_module.engine().take(&id, kind).await {
        Ok(record) => Ok(OkResponse::with_status(StatusCode::CREATED, record)),
        Err(e) => Err(e.into_friendly_error(backups_module).await.into_response()),
    }
}

#[debug_handler]
pub async fn list(
    State(backups_module): State<Arc<dyn BackupsModule>>,
    Path(id): Path<String>,
) -> HandlerResult {
    match backups_module.engine().list(&id).await {
        Ok(listings) => Ok(OkResponse::new(listings).into_response()),
        Err(e) => Err(e.into_friendly_error(backups_module).await.into_response()),
    }
}

#[debug_handler]
pub async fn restore(
    State(backups_module): State<Arc<dyn BackupsModule>>,
    Path((id, backup_id)): Path<(String, String)>,
    payload: Option<Json<RestoreInput>>,
) -> HandlerResult {
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    match backups_module
        .engine()
        .restore(&id, &backup_id, input.database, input.files)
        .await
    {
        Ok(()) => Ok(OkResponse::new(SimpleMessageResponse::new(
            "Restore completed",
        ))
        .into_response()),
        Err(e) => Err(e.into_friendly_error(backups_module).await.into_response()),
    }
}
