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

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// A keyed async mutex map. Guarantees that work holding the lock for a
/// given tenant id is serialized with all other work for the same tenant,
/// while unrelated tenants proceed concurrently.
///
/// Idle entries (nobody holding or waiting) are pruned on every lookup.
pub struct TenantLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns the shared mutex for `tenant_id`, creating it on first use.
    pub fn lock_for(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .expect("tenant lock registry is poisoned");
        map.retain(|_, entry| Arc::strong_count(entry) > 1);
        map.entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Default for TenantLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_same_tenant_is_serialized() {
        let locks = Arc::new(TenantLocks::new());
        let first = locks.lock_for("padariarosa_a1b2c3");
        let guard = first.lock().await;

        let second = locks.lock_for("padariarosa_a1b2c3");
        assert!(second.try_lock().is_err());

        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_different_tenants_do_not_contend() {
        let locks = TenantLocks::new();
        let a = locks.lock_for("tenant_a");
        let _guard = a.lock().await;
        let b = locks.lock_for("tenant_b");
        assert!(b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = TenantLocks::new();
        {
            let entry = locks.lock_for("transient_tenant");
            let _guard = entry.lock().await;
        }
        // Next lookup prunes the now idle entry before inserting its own.
        locks.lock_for("another_tenant");
        assert_eq!(locks.len(), 1);
    }
}
