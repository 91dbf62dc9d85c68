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

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt::{Display, Formatter};

pub type HandlerResult = Result<Response, Response>;

/// A generic response struct used to represent a successful response,
/// containing a success flag and some associated data.
#[derive(Serialize)]
pub struct OkResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> OkResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
    pub fn with_status(status: StatusCode, data: T) -> Response {
        (status, Json(Self::new(data))).into_response()
    }
}

impl<T: Serialize> IntoResponse for OkResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// The body of a failed response. `error` carries the user-facing payload,
/// `status_code` drives the HTTP status of the rendered response.
pub struct ErrorResponse<T: Serialize> {
    pub status_code: StatusCode,
    pub error: T,
}

#[derive(Serialize)]
struct ErrorBody<T: Serialize> {
    success: bool,
    error: T,
}

impl<T: Serialize> IntoResponse for ErrorResponse<T> {
    fn into_response(self) -> Response {
        (
            self.status_code,
            Json(ErrorBody {
                success: false,
                error: self.error,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct GeneralError {
    pub message: String,
}

impl Display for GeneralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Serialize)]
pub struct FormError<'a, T: Serialize> {
    pub message: String,
    pub fields: &'a T,
}

impl<'a, T: Serialize> Display for FormError<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Serialize)]
pub struct SimpleMessageResponse {
    pub message: String,
}

impl SimpleMessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
