//! Short-lived staging of carts awaiting payment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CartLine, Money, PaymentMethod, ShippingInfo, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::error::{CheckoutError, Result};

/// Default lifetime of a staged cart.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default period between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A cart snapshot waiting for its payment to settle.
///
/// Never mutated after creation; consumed at most once by a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub tx_ref: String,
    pub user_id: UserId,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub lines: Vec<CartLine>,
    /// Amount the buyer is asked to pay, priced when the cart was staged.
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    /// True once the entry has outlived `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age > ttl,
            // created_at lies in the future
            Err(_) => false,
        }
    }
}

/// Keyed staging area for carts awaiting payment.
#[async_trait]
pub trait PendingOrderStore: Send + Sync {
    /// Stages a cart. Fails if the reference is already in use.
    async fn put(&self, pending: PendingOrder) -> Result<()>;

    /// Reads a staged cart. Expired entries are reported as absent.
    async fn get(&self, tx_ref: &str) -> Option<PendingOrder>;

    /// Removes a staged cart. Returns true if one was removed.
    async fn delete(&self, tx_ref: &str) -> bool;

    /// Atomically reads and removes a live staged cart.
    async fn take(&self, tx_ref: &str) -> Option<PendingOrder>;

    /// Puts back a cart claimed by [`take`](Self::take).
    async fn restore(&self, pending: PendingOrder);

    /// Removes every entry expired at `now`. Returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of entries currently held, expired ones included.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-memory pending order store with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct InMemoryPendingOrderStore {
    entries: Arc<RwLock<HashMap<String, PendingOrder>>>,
    ttl: Duration,
}

impl InMemoryPendingOrderStore {
    /// Creates a store with the default one-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for InMemoryPendingOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingOrderStore for InMemoryPendingOrderStore {
    async fn put(&self, pending: PendingOrder) -> Result<()> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        if let Some(existing) = entries.get(&pending.tx_ref)
            && !existing.is_expired(self.ttl, now)
        {
            return Err(CheckoutError::DuplicateReference(pending.tx_ref));
        }

        entries.insert(pending.tx_ref.clone(), pending);
        Ok(())
    }

    async fn get(&self, tx_ref: &str) -> Option<PendingOrder> {
        let entries = self.entries.read().await;
        entries
            .get(tx_ref)
            .filter(|p| !p.is_expired(self.ttl, Utc::now()))
            .cloned()
    }

    async fn delete(&self, tx_ref: &str) -> bool {
        self.entries.write().await.remove(tx_ref).is_some()
    }

    async fn take(&self, tx_ref: &str) -> Option<PendingOrder> {
        let mut entries = self.entries.write().await;
        let pending = entries.remove(tx_ref)?;
        if pending.is_expired(self.ttl, Utc::now()) {
            return None;
        }
        Some(pending)
    }

    async fn restore(&self, pending: PendingOrder) {
        let mut entries = self.entries.write().await;
        entries.entry(pending.tx_ref.clone()).or_insert(pending);
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, p| !p.is_expired(self.ttl, now));
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Spawns a task that evicts expired pending orders every `interval`.
///
/// The task stops when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_sweeper(
    store: Arc<dyn PendingOrderStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep_expired(Utc::now()).await;
                    if removed > 0 {
                        metrics::counter!("pending_orders_swept_total").increment(removed as u64);
                        tracing::info!(removed, "Swept expired pending orders");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Pending order sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
