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

use crate::common::clock::Clock;
use crate::common::metrics::SystemCounters;
use crate::events::model::{DomainEvent, EventEnvelope, EventKind};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Handlers run on bus worker tasks. Delivery is at-least-once, so every
/// handler must be idempotent keyed by `(event_id, tenant_id)`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

struct QueueState {
    /// Single FIFO queue; global enqueue order makes per-tenant FIFO trivial.
    queue: VecDeque<EventEnvelope>,
    /// Per-kind occupancy for the bounded-queue backpressure rule.
    counts: HashMap<EventKind, usize>,
    /// Tenants currently being processed by some worker.
    in_flight: HashSet<String>,
    /// Tenants whose queued overdue events were invalidated by a
    /// `PaymentConfirmed`, with the preemption instant.
    preempted: HashMap<String, chrono::DateTime<chrono::Utc>>,
}

/// Single-process, ordered, at-least-once dispatcher for the closed
/// [`DomainEvent`] set.
///
/// Guarantees: per-tenant FIFO by enqueue time, per-tenant serialization
/// across workers, bounded per-type queues whose oldest entry is dropped only
/// past the configured max age, and preemption of queued overdue events by a
/// later payment confirmation for the same tenant.
pub struct EventBus {
    state: Mutex<QueueState>,
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
    wake_workers: Notify,
    wake_publishers: Notify,
    capacity_per_kind: usize,
    max_age: ChronoDuration,
    handler_retries: u32,
    live_workers: AtomicUsize,
    shutting_down: AtomicBool,
    clock: Arc<dyn Clock>,
    counters: Arc<SystemCounters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(
        capacity_per_kind: usize,
        max_age_hours: i64,
        handler_retries: u32,
        clock: Arc<dyn Clock>,
        counters: Arc<SystemCounters>,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                counts: HashMap::new(),
                in_flight: HashSet::new(),
                preempted: HashMap::new(),
            }),
            handlers: RwLock::new(HashMap::new()),
            wake_workers: Notify::new(),
            wake_publishers: Notify::new(),
            capacity_per_kind,
            max_age: ChronoDuration::hours(max_age_hours),
            handler_retries,
            live_workers: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            clock,
            counters,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler for one event kind. Registration happens in the
    /// composition root before the workers are started.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("handler registry is poisoned")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Enqueues an event and returns its id. Blocks only when the per-kind
    /// queue is full of entries younger than the max age.
    pub async fn publish(&self, event: DomainEvent) -> Uuid {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            enqueued_at: self.clock.now(),
            event,
        };
        let event_id = envelope.event_id;
        let kind = envelope.event.kind();
        loop {
            let full = {
                let mut state = self.state.lock().expect("bus state is poisoned");
                if kind == EventKind::PaymentConfirmed {
                    let tenant = envelope.event.tenant_id().to_string();
                    state.preempted.insert(tenant, envelope.enqueued_at);
                }
                let occupied = state.counts.get(&kind).copied().unwrap_or(0);
                if occupied < self.capacity_per_kind {
                    state.queue.push_back(envelope.clone());
                    *state.counts.entry(kind).or_insert(0) += 1;
                    false
                } else if self.evict_expired(&mut state, kind) {
                    continue;
                } else {
                    true
                }
            };
            if full {
                self.wake_publishers.notified().await;
                continue;
            }
            self.wake_workers.notify_one();
            return event_id;
        }
    }

    /// Drops the oldest queued event of `kind` if it has outlived the max
    /// age. Returns whether an entry was evicted.
    fn evict_expired(&self, state: &mut QueueState, kind: EventKind) -> bool {
        let now = self.clock.now();
        let position = state
            .queue
            .iter()
            .position(|envelope| envelope.event.kind() == kind);
        if let Some(position) = position
            && now - state.queue[position].enqueued_at > self.max_age
        {
            let dropped = state.queue.remove(position).expect("position is valid");
            *state.counts.entry(kind).or_insert(1) -= 1;
            self.counters.bus_overflow();
            warn!(
                "Bus overflow: dropped {:?} event {} enqueued at {}",
                kind, dropped.event_id, dropped.enqueued_at
            );
            return true;
        }
        false
    }

    /// Takes the earliest queued event whose tenant is not currently being
    /// processed, marking the tenant in flight.
    fn try_dequeue(&self) -> Option<EventEnvelope> {
        let mut state = self.state.lock().expect("bus state is poisoned");
        let position = state.queue.iter().position(|envelope| {
            !state.in_flight.contains(envelope.event.tenant_id())
        })?;
        let envelope = state.queue.remove(position).expect("position is valid");
        let kind = envelope.event.kind();
        *state.counts.entry(kind).or_insert(1) -= 1;
        state
            .in_flight
            .insert(envelope.event.tenant_id().to_string());
        Some(envelope)
    }

    fn finish(&self, tenant_id: &str) {
        let mut state = self.state.lock().expect("bus state is poisoned");
        state.in_flight.remove(tenant_id);
        let horizon = self.clock.now() - self.max_age;
        state.preempted.retain(|_, at| *at > horizon);
    }

    /// Whether a queued overdue event was invalidated by a later payment
    /// confirmation. Checked at dequeue time.
    fn is_preempted(&self, envelope: &EventEnvelope) -> bool {
        if !envelope.event.is_overdue() {
            return false;
        }
        let state = self.state.lock().expect("bus state is poisoned");
        state
            .preempted
            .get(envelope.event.tenant_id())
            .is_some_and(|at| *at >= envelope.enqueued_at)
    }

    async fn dispatch(&self, envelope: &EventEnvelope) {
        let handlers = {
            let registry = self.handlers.read().expect("handler registry is poisoned");
            registry
                .get(&envelope.event.kind())
                .cloned()
                .unwrap_or_default()
        };
        for handler in handlers {
            let mut attempt = 0u32;
            loop {
                match handler.handle(envelope).await {
                    Ok(()) => break,
                    Err(e) if attempt + 1 < self.handler_retries => {
                        attempt += 1;
                        warn!(
                            "Handler for {:?} failed (attempt {attempt}), correlation_id={}: {e}",
                            envelope.event.kind(),
                            envelope.event_id
                        );
                        tokio::time::sleep(Duration::from_millis(
                            100u64.saturating_mul(1u64 << attempt.min(6)),
                        ))
                        .await;
                    }
                    Err(e) => {
                        // Parked: the event stays failed, the worker moves on.
                        self.counters.bus_parked();
                        error!(
                            "Handler for {:?} parked after {} attempts, correlation_id={}: {e}",
                            envelope.event.kind(),
                            self.handler_retries,
                            envelope.event_id
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, index: usize) {
        debug!("Bus worker {index} started");
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let wakeup = self.wake_workers.notified();
            match self.try_dequeue() {
                Some(envelope) => {
                    let tenant_id = envelope.event.tenant_id().to_string();
                    if self.is_preempted(&envelope) {
                        debug!(
                            "Dropping overdue event {} for {tenant_id}: preempted by payment",
                            envelope.event_id
                        );
                    } else {
                        self.dispatch(&envelope).await;
                    }
                    self.finish(&tenant_id);
                    self.wake_publishers.notify_waiters();
                    // Another event for this tenant may be dispatchable now.
                    self.wake_workers.notify_one();
                }
                None => {
                    tokio::select! {
                        _ = wakeup => {}
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                    }
                }
            }
        }
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("Bus worker {index} stopped");
    }

    /// Spawns the worker pool. Liveness is observable through `is_live`.
    pub fn start(self: &Arc<Self>, worker_count: usize) {
        let mut workers = self.workers.lock().expect("worker registry is poisoned");
        for index in 0..worker_count {
            self.live_workers.fetch_add(1, Ordering::SeqCst);
            let bus = Arc::clone(self);
            workers.push(tokio::spawn(bus.worker_loop(index)));
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_workers.load(Ordering::SeqCst) > 0
    }

    pub fn queued(&self) -> usize {
        self.state.lock().expect("bus state is poisoned").queue.len()
    }

    /// Test hook: synchronous dequeue bypassing the worker pool.
    #[cfg(test)]
    pub(crate) fn try_dequeue_for_test(&self) -> Option<EventEnvelope> {
        let envelope = self.try_dequeue()?;
        self.finish(envelope.event.tenant_id());
        Some(envelope)
    }

    /// Stops accepting work and waits for the workers to drain.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake_workers.notify_waiters();
        let workers = {
            let mut guard = self.workers.lock().expect("worker registry is poisoned");
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::SystemClock;
    use crate::common::clock::tests::FixedClock;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        seen: StdMutex<Vec<(EventKind, String)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
            })
        }
        fn seen(&self) -> Vec<(EventKind, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push((
                envelope.event.kind(),
                envelope.event.tenant_id().to_string(),
            ));
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            anyhow::bail!("simulated handler failure")
        }
    }

    fn test_bus(capacity: usize, max_age_hours: i64, clock: Arc<dyn Clock>) -> Arc<EventBus> {
        Arc::new(EventBus::new(
            capacity,
            max_age_hours,
            2,
            clock,
            Arc::new(SystemCounters::new()),
        ))
    }

    async fn drain(bus: &Arc<EventBus>) {
        for _ in 0..100 {
            if bus.queued() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_events_reach_their_handler_in_order() {
        let bus = test_bus(16, 24, Arc::new(SystemClock));
        let recorder = Recorder::new();
        bus.subscribe(EventKind::TenantProvisioned, recorder.clone());
        bus.subscribe(EventKind::TenantDeleted, recorder.clone());
        bus.publish(DomainEvent::TenantProvisioned {
            tenant_id: "alpha".into(),
        })
        .await;
        bus.publish(DomainEvent::TenantDeleted {
            tenant_id: "alpha".into(),
        })
        .await;
        bus.start(2);
        drain(&bus).await;
        assert_eq!(
            recorder.seen(),
            vec![
                (EventKind::TenantProvisioned, "alpha".to_string()),
                (EventKind::TenantDeleted, "alpha".to_string()),
            ]
        );
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_payment_confirmed_preempts_queued_overdue_events() {
        let bus = test_bus(16, 24, Arc::new(SystemClock));
        let recorder = Recorder::new();
        bus.subscribe(EventKind::OverdueD3, recorder.clone());
        bus.subscribe(EventKind::PaymentConfirmed, recorder.clone());
        bus.publish(DomainEvent::OverdueD3 {
            tenant_id: "alpha".into(),
            invoice_id: "inv_1".into(),
            days_overdue: 3,
        })
        .await;
        bus.publish(DomainEvent::PaymentConfirmed {
            tenant_id: "alpha".into(),
            invoice_id: "inv_1".into(),
        })
        .await;
        bus.start(1);
        drain(&bus).await;
        // The overdue event was dropped at dequeue time; only the payment ran.
        assert_eq!(
            recorder.seen(),
            vec![(EventKind::PaymentConfirmed, "alpha".to_string())]
        );
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_overflow_drops_only_expired_events_and_counts() {
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap(),
        ));
        let counters = Arc::new(SystemCounters::new());
        let bus = Arc::new(EventBus::new(1, 0, 2, clock.clone(), counters.clone()));
        bus.publish(DomainEvent::BackupCompleted {
            tenant_id: "alpha".into(),
            backup_id: "b1".into(),
        })
        .await;
        clock.advance(chrono::Duration::minutes(5));
        // Queue for this kind is full and the oldest entry is past max age
        // (zero hours), so it is evicted to make room.
        bus.publish(DomainEvent::BackupCompleted {
            tenant_id: "beta".into(),
            backup_id: "b2".into(),
        })
        .await;
        assert_eq!(bus.queued(), 1);
        assert_eq!(counters.snapshot().bus_overflow, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_is_parked_and_counted() {
        let counters = Arc::new(SystemCounters::new());
        let bus = Arc::new(EventBus::new(
            16,
            24,
            2,
            Arc::new(SystemClock),
            counters.clone(),
        ));
        bus.subscribe(EventKind::BackupFailed, Arc::new(FailingHandler));
        bus.publish(DomainEvent::BackupFailed {
            tenant_id: "alpha".into(),
            reason: "disk".into(),
        })
        .await;
        bus.start(1);
        drain(&bus).await;
        assert_eq!(counters.snapshot().bus_parked, 1);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_pool_reports_liveness() {
        let bus = test_bus(16, 24, Arc::new(SystemClock));
        assert!(!bus.is_live());
        bus.start(2);
        assert!(bus.is_live());
        bus.shutdown().await;
        assert!(!bus.is_live());
    }
}
