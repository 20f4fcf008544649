//! The authoritative role-gated transition table
//!
//! One table consulted by every caller. The three role-specific UIs hold no
//! permission logic of their own; what a role may do next is exactly
//! `valid_next_states`, and whether a concrete request is legal is exactly
//! `is_allowed`. Side effects are derived here too, so they are a pure
//! function of (from, to, record).
use crate::effects::SideEffect;
use crate::record::{OrderRecord, OrderStatus, Role};

use OrderStatus::*;

/// All statuses, in declaration order. Used to enumerate the table.
pub const ALL_STATUSES: [OrderStatus; 17] = [
    Pending,
    Accepted,
    Rejected,
    Processing,
    AssignedToTransporter,
    AcceptedByTransporter,
    InTransit,
    Delivered,
    Certified,
    Disputed,
    ReturnToWholesaler,
    ReturnAccepted,
    ReturnRejected,
    CancelledByRetailer,
    CancelledByWholesaler,
    CancelledByTransporter,
    Deleted,
];

/// True when (role, from, to) is a legal transition. Everything absent
/// from this table is rejected, which is what keeps the three UIs from
/// drifting apart on what they each think is allowed.
///
/// `Disputed -> Disputed` is the wholesaler resolving a dispute without
/// reassignment: the dispute closes but the order stays flagged.
pub fn is_allowed(role: Role, from: OrderStatus, to: OrderStatus) -> bool {
    matches!(
        (role, from, to),
        // wholesaler triage of a fresh request
        (Role::Wholesaler, Pending, Accepted)
            | (Role::Wholesaler, Pending, Rejected)
            | (Role::Wholesaler, Accepted, Processing)
            | (Role::Wholesaler, Processing, AssignedToTransporter)
            // transporter leg
            | (Role::Transporter, AssignedToTransporter, AcceptedByTransporter)
            | (Role::Transporter, AssignedToTransporter, InTransit)
            | (Role::Transporter, AcceptedByTransporter, InTransit)
            | (Role::Transporter, InTransit, Delivered)
            // retailer closes out the delivery
            | (Role::Retailer, Delivered, Certified)
            | (Role::Retailer, Delivered, Disputed)
            // pre-shipment cancellation, any party, own cancel status only
            | (Role::Retailer, Pending | Accepted | Processing, CancelledByRetailer)
            | (Role::Wholesaler, Pending | Accepted | Processing, CancelledByWholesaler)
            | (Role::Transporter, Pending | Accepted | Processing, CancelledByTransporter)
            // in-shipment cancellation
            | (
                Role::Transporter,
                AssignedToTransporter | AcceptedByTransporter | InTransit,
                CancelledByTransporter,
            )
            | (
                Role::Wholesaler,
                AssignedToTransporter | AcceptedByTransporter | InTransit,
                CancelledByWholesaler,
            )
            // dispute resolution (see module doc for the self-transition)
            | (Role::Wholesaler, Disputed, Disputed)
            | (Role::Wholesaler, Disputed, Processing)
            // return branch
            | (Role::Transporter, Disputed, ReturnToWholesaler)
            | (Role::Wholesaler, ReturnToWholesaler, ReturnAccepted)
            | (Role::Wholesaler, ReturnToWholesaler, ReturnRejected)
            // retailer tombstone
            | (
                Role::Retailer,
                Pending | Rejected | ReturnAccepted | ReturnRejected | CancelledByWholesaler,
                Deleted,
            )
    )
}

/// Business-terminal statuses. The retailer tombstone is the one exception
/// the table still admits out of some of these.
pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(
        status,
        Rejected
            | Certified
            | ReturnAccepted
            | ReturnRejected
            | CancelledByRetailer
            | CancelledByWholesaler
            | CancelledByTransporter
            | Deleted
    )
}

/// Everything a role may legally move an order to from `from`. This is
/// what a role-specific UI renders as available actions.
pub fn valid_next_states(role: Role, from: OrderStatus) -> Vec<OrderStatus> {
    ALL_STATUSES
        .into_iter()
        .filter(|to| is_allowed(role, from, *to))
        .collect()
}

/// Derive the ordered side effects of an accepted transition. Pure in
/// (from, to, record), so replaying the derivation for the same committed
/// transition always yields the same descriptors.
pub fn side_effects(record: &OrderRecord, from: OrderStatus, to: OrderStatus) -> Vec<SideEffect> {
    let notify = |actor_id: &str, event: &str| SideEffect::NotifyActor {
        actor_id: actor_id.to_string(),
        event: event.to_string(),
    };
    let release = SideEffect::ReleaseStock {
        product_id: record.product_id.clone(),
        quantity: record.quantity,
    };

    match (from, to) {
        (Pending, Accepted) => vec![notify(&record.retailer_id, "order_accepted")],
        (Pending, Rejected) => vec![release, notify(&record.retailer_id, "order_rejected")],
        (Accepted, Processing) => vec![notify(&record.retailer_id, "order_processing")],
        (Processing, AssignedToTransporter) => match record.transporter_id.as_deref() {
            Some(transporter) => vec![notify(transporter, "transport_assigned")],
            None => vec![],
        },
        (AssignedToTransporter, AcceptedByTransporter) => {
            vec![notify(&record.wholesaler_id, "transport_accepted")]
        }
        (AssignedToTransporter | AcceptedByTransporter, InTransit) => vec![
            notify(&record.retailer_id, "order_in_transit"),
            notify(&record.wholesaler_id, "order_in_transit"),
        ],
        (InTransit, Delivered) => vec![notify(&record.retailer_id, "order_delivered")],
        (Delivered, Certified) => vec![
            SideEffect::DecrementStock {
                product_id: record.product_id.clone(),
                quantity: record.quantity,
            },
            SideEffect::RecordCertification {
                order_id: record.id.clone(),
            },
            notify(&record.wholesaler_id, "delivery_certified"),
        ],
        // opening a dispute commits no stock
        (Delivered, Disputed) => {
            let mut effects = vec![notify(&record.wholesaler_id, "delivery_disputed")];
            if let Some(transporter) = record.transporter_id.as_deref() {
                effects.push(notify(transporter, "delivery_disputed"));
            }
            effects
        }
        (Disputed, Disputed) => vec![notify(&record.retailer_id, "dispute_resolved")],
        (Disputed, Processing) => vec![notify(&record.retailer_id, "dispute_resolved_reassigning")],
        (Disputed, ReturnToWholesaler) => {
            vec![notify(&record.wholesaler_id, "return_requested")]
        }
        (ReturnToWholesaler, ReturnAccepted) => {
            let mut effects = vec![
                SideEffect::RestoreStock {
                    product_id: record.product_id.clone(),
                    quantity: record.quantity,
                },
                notify(&record.retailer_id, "return_accepted"),
            ];
            if let Some(transporter) = record.transporter_id.as_deref() {
                effects.push(notify(transporter, "return_accepted"));
            }
            effects
        }
        (ReturnToWholesaler, ReturnRejected) => {
            let mut effects = vec![notify(&record.retailer_id, "return_rejected")];
            if let Some(transporter) = record.transporter_id.as_deref() {
                effects.push(notify(transporter, "return_rejected"));
            }
            effects
        }
        // held stock is released only for pre-shipment cancellations
        (
            Pending | Accepted | Processing,
            CancelledByRetailer | CancelledByWholesaler | CancelledByTransporter,
        ) => {
            let mut effects = vec![release];
            effects.extend(counterparty_notifications(record, to, "order_cancelled"));
            effects
        }
        (
            AssignedToTransporter | AcceptedByTransporter | InTransit,
            CancelledByRetailer | CancelledByWholesaler | CancelledByTransporter,
        ) => counterparty_notifications(record, to, "order_cancelled"),
        // tombstone only, no business effect
        (_, Deleted) => vec![],
        _ => vec![],
    }
}

// notify every party except the one whose cancel status this is
fn counterparty_notifications(
    record: &OrderRecord,
    to: OrderStatus,
    event: &str,
) -> Vec<SideEffect> {
    let mut effects = vec![];
    let mut push = |actor_id: &str| {
        effects.push(SideEffect::NotifyActor {
            actor_id: actor_id.to_string(),
            event: event.to_string(),
        })
    };
    if to != CancelledByRetailer {
        push(&record.retailer_id);
    }
    if to != CancelledByWholesaler {
        push(&record.wholesaler_id);
    }
    if to != CancelledByTransporter {
        if let Some(transporter) = record.transporter_id.as_deref() {
            push(transporter);
        }
    }
    effects
}
