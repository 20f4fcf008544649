//! Engine layer API for order lifecycle operations
//!
//! One entry point serves all three role UIs: `request_transition`. The
//! engine loads the record, checks the caller's version, authorizes the
//! actor against the record's role-holder, consults the transition table,
//! applies the payload, appends history and commits the updated record
//! together with its derived side-effect descriptors in one transaction.
//! Descriptors are delivered at-least-once from the outbox; a delivery
//! failure never rolls back the already-committed status change.
use crate::dispute::DisputeResolver;
use crate::effects::{Inventory, Notifier, QueuedEffect, SideEffect};
use crate::error::EngineError;
use crate::record::{HistoryEntry, NewOrder, OrderRecord, OrderStatus, Role, TimeStamp};
use crate::returns::ReturnCoordinator;
use crate::store::OrderStore;
use crate::transitions;
use crate::utils;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A caller's request to move one order one step.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub order_id: String,
    pub actor_role: Role,
    pub actor_id: String,
    /// The record version the caller last saw. A mismatch is rejected so
    /// the caller refetches instead of clobbering a concurrent commit.
    pub expected_version: u64,
    pub target_status: OrderStatus,
    pub payload: TransitionPayload,
}

/// Transition-specific required fields. Dispute resolution is two explicit
/// variants rather than a resolve + reassign flag on one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransitionPayload {
    #[default]
    None,
    Reject {
        rejection_reason: String,
    },
    AssignTransporter {
        transporter_id: String,
    },
    Cancel {
        cancellation_reason: String,
    },
    OpenDispute {
        reason: String,
    },
    ResolveDispute {
        resolution_notes: String,
    },
    ResolveDisputeWithReassignment {
        resolution_notes: String,
    },
    RequestReturn {
        return_reason: String,
    },
    RejectReturn {
        return_rejection_reason: String,
    },
}

pub struct OrderEngine {
    store: OrderStore,
    inventory: Arc<dyn Inventory>,
    notifier: Arc<dyn Notifier>,
}

impl OrderEngine {
    pub fn new(
        instance: Arc<sled::Db>,
        inventory: Arc<dyn Inventory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            store: OrderStore::open(&instance)?,
            inventory,
            notifier,
        })
    }

    /// Create a `Pending` order from a retailer's terms. The stock-cover
    /// check against the product's available quantity happens in the
    /// external inventory system before the caller gets here.
    pub fn create_order(&self, order: NewOrder) -> Result<OrderRecord, EngineError> {
        let id = utils::new_uuid_to_bech32("order_").map_err(EngineError::codec)?;
        let record = OrderRecord::create(id, order, TimeStamp::new())?;
        self.store.insert_new(&record)?;

        debug!(order = %record.id, "order created");
        Ok(record)
    }

    /// Load the latest committed record, the refetch path after a
    /// `StaleVersion` rejection.
    pub fn fetch(&self, order_id: &str) -> Result<OrderRecord, EngineError> {
        self.store.load(order_id).map(|(record, _)| record)
    }

    /// The single transition operation exposed to all collaborators.
    /// Returns the updated record (with its new version) on success, or a
    /// structured rejection; nothing is retried internally.
    pub fn request_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<OrderRecord, EngineError> {
        let (mut record, prior) = self.store.load(&request.order_id)?;

        if record.version != request.expected_version {
            return Err(EngineError::StaleVersion {
                expected: request.expected_version,
                actual: record.version,
            });
        }

        // the actor must be the record's stored holder of the acting role,
        // not merely someone holding that role elsewhere
        match record.role_holder(request.actor_role) {
            Some(holder) if holder == request.actor_id => {}
            _ => {
                return Err(EngineError::Unauthorized {
                    role: request.actor_role,
                    actor_id: request.actor_id,
                });
            }
        }

        let from = record.status;
        if !transitions::is_allowed(request.actor_role, from, request.target_status) {
            return Err(EngineError::InvalidTransition {
                from,
                to: request.target_status,
                role: request.actor_role,
            });
        }

        let now = TimeStamp::new();
        let reason = Self::apply_payload(&mut record, from, &request, now.clone())?;

        record.status = request.target_status;
        record.version += 1;
        record.history.push(HistoryEntry {
            from_status: from,
            to_status: request.target_status,
            actor_role: request.actor_role,
            actor_id: request.actor_id,
            timestamp: now,
            reason,
        });

        let mut queued = vec![];
        for (index, effect) in transitions::side_effects(&record, from, record.status)
            .into_iter()
            .enumerate()
        {
            queued.push(QueuedEffect::new(&record, index as u32, effect)?);
        }

        // record and descriptors land in one transaction; the commit can
        // still abort if another caller committed since our load, and that
        // race also surfaces as StaleVersion
        self.store
            .commit_with_effects(&record, prior, request.expected_version, &queued)?;
        debug!(
            order = %record.id,
            from = ?from,
            to = ?record.status,
            version = record.version,
            "transition committed"
        );

        self.dispatch(&queued);

        Ok(record)
    }

    /// Redeliver everything still sitting in the outbox. Returns how many
    /// descriptors were delivered and acked this pass.
    pub fn flush_effects(&self) -> Result<usize, EngineError> {
        let queued = self.store.queued_effects()?;
        let mut delivered = 0;
        for effect in &queued {
            match self.deliver(effect) {
                Ok(()) => {
                    self.store.ack_effect(&effect.id)?;
                    delivered += 1;
                }
                Err(err) => {
                    warn!(effect = %effect.id, order = %effect.order_id, %err,
                        "side effect redelivery failed; left queued");
                }
            }
        }
        Ok(delivered)
    }

    // apply the transition-specific mutations and pull out the reason (if
    // any) recorded in the history entry
    fn apply_payload(
        record: &mut OrderRecord,
        from: OrderStatus,
        request: &TransitionRequest,
        now: TimeStamp<Utc>,
    ) -> Result<Option<String>, EngineError> {
        use OrderStatus::*;
        use TransitionPayload as P;

        match (request.target_status, &request.payload) {
            (
                Accepted | Processing | AcceptedByTransporter | InTransit | Delivered | Certified
                | Deleted,
                P::None,
            ) => {
                if request.target_status == Processing && from == Disputed {
                    // leaving Disputed for Processing is the reassignment
                    // path and must carry resolution notes
                    return Err(EngineError::MissingRequiredField("resolution_notes"));
                }
                match request.target_status {
                    Delivered => record.actual_delivery_date = Some(now),
                    Certified => record.delivery_certification_date = Some(now),
                    _ => {}
                }
                Ok(None)
            }
            (Rejected, P::Reject { rejection_reason }) => {
                require_text("rejection_reason", rejection_reason)?;
                record.rejection_reason = Some(rejection_reason.clone());
                Ok(Some(rejection_reason.clone()))
            }
            (AssignedToTransporter, P::AssignTransporter { transporter_id }) => {
                require_text("transporter_id", transporter_id)?;
                record.transporter_id = Some(transporter_id.clone());
                Ok(None)
            }
            (
                CancelledByRetailer | CancelledByWholesaler | CancelledByTransporter,
                P::Cancel {
                    cancellation_reason,
                },
            ) => {
                require_text("cancellation_reason", cancellation_reason)?;
                record.cancellation_reason = Some(cancellation_reason.clone());
                Ok(Some(cancellation_reason.clone()))
            }
            (Disputed, P::OpenDispute { reason }) if from == Delivered => {
                DisputeResolver::open(record, reason, now)?;
                Ok(Some(reason.clone()))
            }
            (Disputed, P::ResolveDispute { resolution_notes }) if from == Disputed => {
                DisputeResolver::resolve(record, resolution_notes, now)?;
                Ok(Some(resolution_notes.clone()))
            }
            (Processing, P::ResolveDisputeWithReassignment { resolution_notes })
                if from == Disputed =>
            {
                DisputeResolver::resolve_and_reassign(record, resolution_notes, now)?;
                Ok(Some(resolution_notes.clone()))
            }
            (ReturnToWholesaler, P::RequestReturn { return_reason }) => {
                ReturnCoordinator::request(record, return_reason, now)?;
                Ok(Some(return_reason.clone()))
            }
            (ReturnAccepted, P::None) => {
                ReturnCoordinator::accept(record, now)?;
                Ok(None)
            }
            (
                ReturnRejected,
                P::RejectReturn {
                    return_rejection_reason,
                },
            ) => {
                ReturnCoordinator::reject(record, return_rejection_reason, now)?;
                Ok(Some(return_rejection_reason.clone()))
            }
            (target, _) => Err(EngineError::MissingRequiredField(missing_field(
                from, target,
            ))),
        }
    }

    // best-effort first delivery; failures stay queued for flush_effects
    fn dispatch(&self, queued: &[QueuedEffect]) {
        for effect in queued {
            match self.deliver(effect) {
                Ok(()) => {
                    if let Err(err) = self.store.ack_effect(&effect.id) {
                        warn!(effect = %effect.id, %err,
                            "delivered effect could not be acked; will be redelivered");
                    }
                }
                Err(err) => {
                    warn!(effect = %effect.id, order = %effect.order_id, %err,
                        "side effect delivery failed; left queued");
                }
            }
        }
    }

    fn deliver(&self, queued: &QueuedEffect) -> anyhow::Result<()> {
        match &queued.effect {
            SideEffect::DecrementStock {
                product_id,
                quantity,
            } => self
                .inventory
                .decrement_stock(&queued.id, product_id, *quantity),
            SideEffect::RestoreStock {
                product_id,
                quantity,
            } => self
                .inventory
                .restore_stock(&queued.id, product_id, *quantity),
            SideEffect::ReleaseStock {
                product_id,
                quantity,
            } => self
                .inventory
                .release_stock(&queued.id, product_id, *quantity),
            SideEffect::NotifyActor { actor_id, event } => {
                self.notifier
                    .notify(&queued.id, actor_id, event, &queued.order_id)
            }
            SideEffect::RecordCertification { order_id } => {
                // the certification date is already on the committed record;
                // the descriptor marks it for downstream receipt systems
                info!(order = %order_id, effect = %queued.id, "delivery certification recorded");
                Ok(())
            }
        }
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::MissingRequiredField(field));
    }
    Ok(())
}

// the field a malformed payload was missing for the requested target
fn missing_field(from: OrderStatus, target: OrderStatus) -> &'static str {
    use OrderStatus::*;
    match target {
        Rejected => "rejection_reason",
        AssignedToTransporter => "transporter_id",
        CancelledByRetailer | CancelledByWholesaler | CancelledByTransporter => {
            "cancellation_reason"
        }
        Disputed if from == Delivered => "delivery_dispute.reason",
        Disputed => "resolution_notes",
        Processing if from == Disputed => "resolution_notes",
        ReturnToWholesaler => "return_details.return_reason",
        ReturnRejected => "return_details.return_rejection_reason",
        _ => "payload",
    }
}
