//! Return micro-workflow branching off a dispute
//!
//! The transporter opens the return on `Disputed -> ReturnToWholesaler`; the
//! wholesaler then accepts (stock restored) or rejects (reason required).
//! Both decisions are terminal for the sub-flow and set the parent order
//! status directly, it does not revert to `Disputed`.
use crate::error::EngineError;
use crate::record::{OrderRecord, OrderStatus, ReturnDetails, Role, TimeStamp};
use chrono::Utc;

pub struct ReturnCoordinator;

impl ReturnCoordinator {
    /// Open the return sub-record. Only meaningful on a disputed order,
    /// and requires a non-empty reason.
    pub fn request(
        record: &mut OrderRecord,
        return_reason: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), EngineError> {
        if return_reason.trim().is_empty() {
            return Err(EngineError::MissingRequiredField(
                "return_details.return_reason",
            ));
        }
        if record.delivery_dispute.is_none() {
            return Err(EngineError::InvalidTransition {
                from: record.status,
                to: OrderStatus::ReturnToWholesaler,
                role: Role::Transporter,
            });
        }

        record.return_details = Some(ReturnDetails {
            return_reason: return_reason.to_string(),
            return_requested_at: now,
            return_rejection_reason: None,
            return_decision_at: None,
        });

        Ok(())
    }

    /// Accept the return. The restock side effect is derived by the
    /// transition table, not here.
    pub fn accept(record: &mut OrderRecord, now: TimeStamp<Utc>) -> Result<(), EngineError> {
        let details = Self::undecided_return_mut(record, OrderStatus::ReturnAccepted)?;
        details.return_decision_at = Some(now);
        Ok(())
    }

    /// Reject the return with a reason.
    pub fn reject(
        record: &mut OrderRecord,
        return_rejection_reason: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), EngineError> {
        if return_rejection_reason.trim().is_empty() {
            return Err(EngineError::MissingRequiredField(
                "return_details.return_rejection_reason",
            ));
        }

        let details = Self::undecided_return_mut(record, OrderStatus::ReturnRejected)?;
        details.return_rejection_reason = Some(return_rejection_reason.to_string());
        details.return_decision_at = Some(now);

        Ok(())
    }

    // an open return request with no decision yet
    fn undecided_return_mut(
        record: &mut OrderRecord,
        target: OrderStatus,
    ) -> Result<&mut ReturnDetails, EngineError> {
        match record.return_details.as_mut() {
            Some(details) if details.return_decision_at.is_none() => Ok(details),
            _ => Err(EngineError::InvalidTransition {
                from: OrderStatus::ReturnToWholesaler,
                to: target,
                role: Role::Wholesaler,
            }),
        }
    }
}
