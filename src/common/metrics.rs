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

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters surfaced on the health endpoint.
#[derive(Default)]
pub struct SystemCounters {
    webhook_invalid_signature: AtomicU64,
    webhook_duplicate: AtomicU64,
    webhook_ignored: AtomicU64,
    bus_overflow: AtomicU64,
    bus_parked: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CountersSnapshot {
    pub webhook_invalid_signature: u64,
    pub webhook_duplicate: u64,
    pub webhook_ignored: u64,
    pub bus_overflow: u64,
    pub bus_parked: u64,
}

impl SystemCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn webhook_invalid_signature(&self) {
        self.webhook_invalid_signature.fetch_add(1, Ordering::Relaxed);
    }
    pub fn webhook_duplicate(&self) {
        self.webhook_duplicate.fetch_add(1, Ordering::Relaxed);
    }
    pub fn webhook_ignored(&self) {
        self.webhook_ignored.fetch_add(1, Ordering::Relaxed);
    }
    pub fn bus_overflow(&self) {
        self.bus_overflow.fetch_add(1, Ordering::Relaxed);
    }
    pub fn bus_parked(&self) {
        self.bus_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            webhook_invalid_signature: self.webhook_invalid_signature.load(Ordering::Relaxed),
            webhook_duplicate: self.webhook_duplicate.load(Ordering::Relaxed),
            webhook_ignored: self.webhook_ignored.load(Ordering::Relaxed),
            bus_overflow: self.bus_overflow.load(Ordering::Relaxed),
            bus_parked: self.bus_parked.load(Ordering::Relaxed),
        }
    }
}
