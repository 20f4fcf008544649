//! Side-effect descriptors and the collaborator boundary
//!
//! Every accepted transition derives an ordered list of descriptors
//! (stock mutations, notifications). The status commit and the descriptor
//! delivery are deliberately decoupled: descriptors are persisted to an
//! outbox and delivered at-least-once, so the collaborator side must be
//! idempotent per descriptor id. A descriptor id is the sha256 of its CBOR
//! encoding together with the order id and post-transition version, which
//! makes replays detectable.
use crate::error::EngineError;
use crate::record::OrderRecord;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// A non-status mutation deterministically produced by a transition and
/// dispatched asynchronously.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Commit the certified quantity out of the wholesaler's stock and
    /// into the retailer's system stock.
    #[n(0)]
    DecrementStock {
        #[n(0)]
        product_id: String,
        #[n(1)]
        quantity: u64,
    },
    /// Put an accepted return's quantity back into the wholesaler's stock.
    #[n(1)]
    RestoreStock {
        #[n(0)]
        product_id: String,
        #[n(1)]
        quantity: u64,
    },
    /// Free a soft hold taken at order creation (rejections and
    /// pre-shipment cancellations).
    #[n(2)]
    ReleaseStock {
        #[n(0)]
        product_id: String,
        #[n(1)]
        quantity: u64,
    },
    /// Fire-and-forget counter-party notification.
    #[n(3)]
    NotifyActor {
        #[n(0)]
        actor_id: String,
        #[n(1)]
        event: String,
    },
    /// Record the retailer's delivery certification with the external
    /// receipt system.
    #[n(4)]
    RecordCertification {
        #[n(0)]
        order_id: String,
    },
}

/// A descriptor persisted in the outbox, keyed by its content-hash id.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct QueuedEffect {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub version: u64,
    #[n(3)]
    pub effect: SideEffect,
}

impl QueuedEffect {
    /// Build the queued form of a derived descriptor. The index keeps two
    /// otherwise identical descriptors from one transition distinct.
    pub fn new(
        record: &OrderRecord,
        index: u32,
        effect: SideEffect,
    ) -> Result<Self, EngineError> {
        let payload = minicbor::to_vec(&(record.id.as_str(), record.version, index, &effect))
            .map_err(EngineError::codec)?;
        Ok(Self {
            id: sha256::digest(&payload),
            order_id: record.id.clone(),
            version: record.version,
            effect,
        })
    }
}

/// Inventory collaborator. Implementations must be idempotent per
/// `effect_id`: receiving the same descriptor twice must not move stock
/// twice, since outbox delivery is at-least-once.
pub trait Inventory: Send + Sync {
    fn decrement_stock(&self, effect_id: &str, product_id: &str, quantity: u64)
    -> anyhow::Result<()>;
    fn restore_stock(&self, effect_id: &str, product_id: &str, quantity: u64)
    -> anyhow::Result<()>;
    fn release_stock(&self, effect_id: &str, product_id: &str, quantity: u64)
    -> anyhow::Result<()>;
}

/// Notification collaborator, fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, effect_id: &str, actor_id: &str, event: &str, order_id: &str)
    -> anyhow::Result<()>;
}

/// In-memory inventory keeping per-product stock levels and soft holds.
/// Replayed descriptor ids are ignored, which is the idempotence contract
/// the engine relies on.
#[derive(Default)]
pub struct InMemoryInventory {
    stock: Mutex<HashMap<String, i64>>,
    held: Mutex<HashMap<String, i64>>,
    applied: Mutex<HashSet<String>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, product_id: &str, level: i64) {
        self.stock.lock().unwrap().insert(product_id.into(), level);
    }

    pub fn stock_level(&self, product_id: &str) -> i64 {
        *self.stock.lock().unwrap().get(product_id).unwrap_or(&0)
    }

    pub fn hold(&self, product_id: &str, quantity: i64) {
        *self.held.lock().unwrap().entry(product_id.into()).or_default() += quantity;
    }

    pub fn held_level(&self, product_id: &str) -> i64 {
        *self.held.lock().unwrap().get(product_id).unwrap_or(&0)
    }

    // true when the id has not been seen before
    fn first_application(&self, effect_id: &str) -> bool {
        self.applied.lock().unwrap().insert(effect_id.to_string())
    }
}

// the ledger is signed; a quantity past i64::MAX must fail the delivery
// rather than wrap, and it must fail before the id is marked applied
fn ledger_quantity(quantity: u64) -> anyhow::Result<i64> {
    i64::try_from(quantity)
        .map_err(|_| anyhow::anyhow!("quantity {quantity} exceeds the stock ledger range"))
}

impl Inventory for InMemoryInventory {
    fn decrement_stock(
        &self,
        effect_id: &str,
        product_id: &str,
        quantity: u64,
    ) -> anyhow::Result<()> {
        let quantity = ledger_quantity(quantity)?;
        if self.first_application(effect_id) {
            *self
                .stock
                .lock()
                .unwrap()
                .entry(product_id.into())
                .or_default() -= quantity;
        }
        Ok(())
    }

    fn restore_stock(
        &self,
        effect_id: &str,
        product_id: &str,
        quantity: u64,
    ) -> anyhow::Result<()> {
        let quantity = ledger_quantity(quantity)?;
        if self.first_application(effect_id) {
            *self
                .stock
                .lock()
                .unwrap()
                .entry(product_id.into())
                .or_default() += quantity;
        }
        Ok(())
    }

    fn release_stock(
        &self,
        effect_id: &str,
        product_id: &str,
        quantity: u64,
    ) -> anyhow::Result<()> {
        let quantity = ledger_quantity(quantity)?;
        if self.first_application(effect_id) {
            let mut held = self.held.lock().unwrap();
            let entry = held.entry(product_id.into()).or_default();
            *entry -= quantity;
        }
        Ok(())
    }
}

/// In-memory notifier that records every delivered notification, mainly
/// useful to assert on in tests and demos.
#[derive(Default)]
pub struct InMemoryNotifier {
    delivered: Mutex<Vec<(String, String, String)>>,
    seen: Mutex<HashSet<String>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// (actor_id, event, order_id) triples in delivery order.
    pub fn delivered(&self) -> Vec<(String, String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(
        &self,
        effect_id: &str,
        actor_id: &str,
        event: &str,
        order_id: &str,
    ) -> anyhow::Result<()> {
        if self.seen.lock().unwrap().insert(effect_id.to_string()) {
            self.delivered.lock().unwrap().push((
                actor_id.to_string(),
                event.to_string(),
                order_id.to_string(),
            ));
        }
        Ok(())
    }
}
