//! Dispute micro-workflow for delivered orders
//!
//! A dispute is opened by the retailer on `Delivered -> Disputed` and closed
//! by the wholesaler, either in place or with transporter reassignment.
//! Resolving without reassignment leaves the order status at `Disputed`;
//! the closed dispute record stays on the order as history.
use crate::error::EngineError;
use crate::record::{DeliveryDispute, OrderRecord, OrderStatus, Role, TimeStamp};
use chrono::Utc;

pub struct DisputeResolver;

impl DisputeResolver {
    /// Open the dispute sub-record. Requires a non-empty reason.
    pub fn open(
        record: &mut OrderRecord,
        reason: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::MissingRequiredField("delivery_dispute.reason"));
        }

        record.delivery_dispute = Some(DeliveryDispute {
            reason: reason.to_string(),
            disputed_at: now,
            resolution_notes: None,
            resolved_at: None,
        });

        Ok(())
    }

    /// Close the dispute in place. The order stays `Disputed`.
    pub fn resolve(
        record: &mut OrderRecord,
        resolution_notes: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), EngineError> {
        if resolution_notes.trim().is_empty() {
            return Err(EngineError::MissingRequiredField("resolution_notes"));
        }

        let dispute = Self::open_dispute_mut(record, OrderStatus::Disputed)?;

        dispute.resolution_notes = Some(resolution_notes.to_string());
        dispute.resolved_at = Some(now);

        Ok(())
    }

    /// Close the dispute and send the order back to `Processing` with the
    /// transporter cleared, so the wholesaler must assign a fresh one.
    pub fn resolve_and_reassign(
        record: &mut OrderRecord,
        resolution_notes: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), EngineError> {
        if resolution_notes.trim().is_empty() {
            return Err(EngineError::MissingRequiredField("resolution_notes"));
        }

        {
            let dispute = Self::open_dispute_mut(record, OrderStatus::Processing)?;
            dispute.resolution_notes = Some(resolution_notes.to_string());
            dispute.resolved_at = Some(now);
        }

        record.transporter_id = None;

        Ok(())
    }

    // an open (unresolved) dispute must exist for either resolution path
    fn open_dispute_mut(
        record: &mut OrderRecord,
        target: OrderStatus,
    ) -> Result<&mut DeliveryDispute, EngineError> {
        match record.delivery_dispute.as_mut() {
            Some(dispute) if dispute.resolved_at.is_none() => Ok(dispute),
            _ => Err(EngineError::InvalidTransition {
                from: OrderStatus::Disputed,
                to: target,
                role: Role::Wholesaler,
            }),
        }
    }
}
