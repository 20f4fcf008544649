//! Core order record, statuses, roles and audit history
use crate::error::EngineError;
use chrono::{DateTime, TimeZone, Utc};

/// The three independent parties that may act on an order. Every
/// transition is gated on exactly one of these.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Retailer,
    #[n(1)]
    Wholesaler,
    #[n(2)]
    Transporter,
}

/// Single source of truth for where an order sits in its lifecycle.
/// Never inferred from other fields.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    Processing,
    #[n(4)]
    AssignedToTransporter,
    #[n(5)]
    AcceptedByTransporter,
    #[n(6)]
    InTransit,
    #[n(7)]
    Delivered,
    #[n(8)]
    Certified,
    #[n(9)]
    Disputed,
    #[n(10)]
    ReturnToWholesaler,
    #[n(11)]
    ReturnAccepted,
    #[n(12)]
    ReturnRejected,
    #[n(13)]
    CancelledByRetailer,
    #[n(14)]
    CancelledByWholesaler,
    #[n(15)]
    CancelledByTransporter,
    #[n(16)]
    Deleted,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Sub-record opened by the retailer on `Delivered -> Disputed`. Survives
/// resolution as a closed record; it is never removed from the order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DeliveryDispute {
    #[n(0)]
    pub reason: String,
    #[n(1)]
    pub disputed_at: TimeStamp<Utc>,
    #[n(2)]
    pub resolution_notes: Option<String>,
    #[n(3)]
    pub resolved_at: Option<TimeStamp<Utc>>,
}

/// Sub-record opened by the transporter on `Disputed -> ReturnToWholesaler`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReturnDetails {
    #[n(0)]
    pub return_reason: String,
    #[n(1)]
    pub return_requested_at: TimeStamp<Utc>,
    #[n(2)]
    pub return_rejection_reason: Option<String>,
    #[n(3)]
    pub return_decision_at: Option<TimeStamp<Utc>>,
}

/// One entry per accepted transition, appended and never mutated. The only
/// way to reconstruct how an order reached its current status.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    #[n(0)]
    pub from_status: OrderStatus,
    #[n(1)]
    pub to_status: OrderStatus,
    #[n(2)]
    pub actor_role: Role,
    #[n(3)]
    pub actor_id: String,
    #[n(4)]
    pub timestamp: TimeStamp<Utc>,
    #[n(5)]
    pub reason: Option<String>,
}

/// Commercial terms supplied by the retailer at creation. The record's id
/// is minted by the engine; the terms are immutable thereafter.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub retailer_id: String,
    pub wholesaler_id: String,
    pub product_id: String,
    pub quantity: u64,
    pub unit_price: u64,
    pub measurement_unit: String,
}

/// One record per purchase request, the unit of truth for status and
/// history. Mutated exclusively through engine transitions and never
/// physically deleted (`Deleted` is a tombstone status).
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct OrderRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub status: OrderStatus,
    #[n(2)]
    pub retailer_id: String,
    #[n(3)]
    pub wholesaler_id: String,
    #[n(4)]
    pub transporter_id: Option<String>,
    #[n(5)]
    pub product_id: String,
    #[n(6)]
    pub quantity: u64,
    #[n(7)]
    pub unit_price: u64,
    #[n(8)]
    pub total_price: u64,
    #[n(9)]
    pub measurement_unit: String,
    #[n(10)]
    pub cancellation_reason: Option<String>,
    #[n(11)]
    pub rejection_reason: Option<String>,
    #[n(12)]
    pub delivery_dispute: Option<DeliveryDispute>,
    #[n(13)]
    pub return_details: Option<ReturnDetails>,
    #[n(14)]
    pub delivery_certification_date: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub actual_delivery_date: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub history: Vec<HistoryEntry>,
    #[n(17)]
    pub version: u64,
    #[n(18)]
    pub created_at: TimeStamp<Utc>,
}

impl OrderRecord {
    /// Construct a fresh `Pending` record from the retailer's terms.
    /// History starts empty; the creation itself is not a transition.
    pub fn create(id: String, order: NewOrder, now: TimeStamp<Utc>) -> Result<Self, EngineError> {
        if order.retailer_id.is_empty() {
            return Err(EngineError::MissingRequiredField("retailer_id"));
        }
        if order.wholesaler_id.is_empty() {
            return Err(EngineError::MissingRequiredField("wholesaler_id"));
        }
        if order.product_id.is_empty() {
            return Err(EngineError::MissingRequiredField("product_id"));
        }
        if order.quantity == 0 {
            return Err(EngineError::MissingRequiredField("quantity"));
        }
        if order.unit_price == 0 {
            return Err(EngineError::MissingRequiredField("unit_price"));
        }
        let total_price = order
            .quantity
            .checked_mul(order.unit_price)
            .ok_or(EngineError::PriceOverflow {
                quantity: order.quantity,
                unit_price: order.unit_price,
            })?;

        Ok(Self {
            id,
            status: OrderStatus::Pending,
            retailer_id: order.retailer_id,
            wholesaler_id: order.wholesaler_id,
            transporter_id: None,
            product_id: order.product_id,
            quantity: order.quantity,
            unit_price: order.unit_price,
            total_price,
            measurement_unit: order.measurement_unit,
            cancellation_reason: None,
            rejection_reason: None,
            delivery_dispute: None,
            return_details: None,
            delivery_certification_date: None,
            actual_delivery_date: None,
            history: vec![],
            version: 1,
            created_at: now,
        })
    }

    /// The stored holder of a role on this order, if any. Transporter is
    /// unset until a wholesaler assigns one.
    pub fn role_holder(&self, role: Role) -> Option<&str> {
        match role {
            Role::Retailer => Some(self.retailer_id.as_str()),
            Role::Wholesaler => Some(self.wholesaler_id.as_str()),
            Role::Transporter => self.transporter_id.as_deref(),
        }
    }

    /// The status the history says we should be in. Used to check the
    /// record-level invariant `status == last history to_status`.
    pub fn status_from_history(&self) -> OrderStatus {
        self.history
            .last()
            .map(|entry| entry.to_status)
            .unwrap_or(OrderStatus::Pending)
    }

    /// Render the audit trail, one line per transition.
    pub fn format_history(&self) -> String {
        let mut out = String::new();
        for entry in &self.history {
            out.push_str(&format!(
                "{} {:?}: {:?} -> {:?} by {}{}\n",
                entry.timestamp.to_datetime_utc().to_rfc3339(),
                entry.actor_role,
                entry.from_status,
                entry.to_status,
                entry.actor_id,
                entry
                    .reason
                    .as_deref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default(),
            ));
        }
        out
    }
}
