//! End-to-end lifecycle scenarios against a real sled database

use order_lifecycle::{
    effects::{InMemoryInventory, InMemoryNotifier},
    engine::{OrderEngine, TransitionPayload, TransitionRequest},
    error::EngineError,
    record::{NewOrder, OrderRecord, OrderStatus, Role},
    utils,
};
use sled::open;
use std::sync::Arc;
use tempfile::tempdir;

struct Fixture {
    engine: OrderEngine,
    inventory: Arc<InMemoryInventory>,
    notifier: Arc<InMemoryNotifier>,
    retailer_id: String,
    wholesaler_id: String,
    transporter_id: String,
    product_id: String,
    // sled locks its directory, so the tempdir must stay alive for the
    // lifetime of the engine
    _temp_dir: tempfile::TempDir,
}

// Sled uses file-based locking to prevent concurrent access, so each test
// gets its own database on temp for simplified cleanup.
fn fixture(db_name: &str) -> anyhow::Result<Fixture> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(db_name))?;
    let db = Arc::new(db);

    let inventory = Arc::new(InMemoryInventory::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = OrderEngine::new(db, inventory.clone(), notifier.clone())?;

    Ok(Fixture {
        engine,
        inventory,
        notifier,
        retailer_id: utils::new_uuid_to_bech32("retailer_")?,
        wholesaler_id: utils::new_uuid_to_bech32("wholesaler_")?,
        transporter_id: utils::new_uuid_to_bech32("transporter_")?,
        product_id: utils::new_uuid_to_bech32("product_")?,
        _temp_dir: temp_dir,
    })
}

impl Fixture {
    fn create_order(&self, quantity: u64) -> Result<OrderRecord, EngineError> {
        self.engine.create_order(NewOrder {
            retailer_id: self.retailer_id.clone(),
            wholesaler_id: self.wholesaler_id.clone(),
            product_id: self.product_id.clone(),
            quantity,
            unit_price: 250,
            measurement_unit: "kg".into(),
        })
    }

    fn step(
        &self,
        record: &OrderRecord,
        role: Role,
        actor_id: &str,
        target: OrderStatus,
        payload: TransitionPayload,
    ) -> Result<OrderRecord, EngineError> {
        self.engine.request_transition(TransitionRequest {
            order_id: record.id.clone(),
            actor_role: role,
            actor_id: actor_id.to_string(),
            expected_version: record.version,
            target_status: target,
            payload,
        })
    }

    // drive an order from creation up to Delivered along the happy path
    fn delivered_order(&self, quantity: u64) -> anyhow::Result<OrderRecord> {
        let record = self.create_order(quantity)?;
        let record = self.step(
            &record,
            Role::Wholesaler,
            &self.wholesaler_id,
            OrderStatus::Accepted,
            TransitionPayload::None,
        )?;
        let record = self.step(
            &record,
            Role::Wholesaler,
            &self.wholesaler_id,
            OrderStatus::Processing,
            TransitionPayload::None,
        )?;
        let record = self.step(
            &record,
            Role::Wholesaler,
            &self.wholesaler_id,
            OrderStatus::AssignedToTransporter,
            TransitionPayload::AssignTransporter {
                transporter_id: self.transporter_id.clone(),
            },
        )?;
        let record = self.step(
            &record,
            Role::Transporter,
            &self.transporter_id,
            OrderStatus::InTransit,
            TransitionPayload::None,
        )?;
        let record = self.step(
            &record,
            Role::Transporter,
            &self.transporter_id,
            OrderStatus::Delivered,
            TransitionPayload::None,
        )?;
        Ok(record)
    }
}

#[test]
fn full_lifecycle_to_certification() -> anyhow::Result<()> {
    let fx = fixture("full_lifecycle.db")?;
    fx.inventory.set_stock(&fx.product_id, 100);

    let record = fx.delivered_order(40)?;
    assert_eq!(record.status, OrderStatus::Delivered);
    assert!(record.actual_delivery_date.is_some());

    let record = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::Certified,
        TransitionPayload::None,
    )?;

    assert_eq!(record.status, OrderStatus::Certified);
    assert!(record.delivery_certification_date.is_some());
    // creation is version 1, six transitions follow
    assert_eq!(record.version, 7);
    assert_eq!(record.status, record.status_from_history());

    // certification committed the stock decrement
    assert_eq!(fx.inventory.stock_level(&fx.product_id), 60);

    // counter-parties heard about the certification
    let delivered = fx.notifier.delivered();
    assert!(
        delivered
            .iter()
            .any(|(actor, event, _)| actor == &fx.wholesaler_id && event == "delivery_certified")
    );

    Ok(())
}

#[test]
fn wrong_transporter_is_unauthorized() -> anyhow::Result<()> {
    let fx = fixture("wrong_transporter.db")?;

    let record = fx.create_order(10)?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Accepted,
        TransitionPayload::None,
    )?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Processing,
        TransitionPayload::None,
    )?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::AssignedToTransporter,
        TransitionPayload::AssignTransporter {
            transporter_id: fx.transporter_id.clone(),
        },
    )?;

    // a different transporter tries to take the shipment
    let imposter = utils::new_uuid_to_bech32("transporter_")?;
    let result = fx.step(
        &record,
        Role::Transporter,
        &imposter,
        OrderStatus::InTransit,
        TransitionPayload::None,
    );

    assert!(matches!(result, Err(EngineError::Unauthorized { .. })));

    // the record is untouched
    let stored = fx.engine.fetch(&record.id)?;
    assert_eq!(stored, record);

    Ok(())
}

#[test]
fn dispute_return_and_restock() -> anyhow::Result<()> {
    let fx = fixture("dispute_return.db")?;
    fx.inventory.set_stock(&fx.product_id, 100);

    let record = fx.delivered_order(40)?;

    let record = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::Disputed,
        TransitionPayload::OpenDispute {
            reason: "wrong item".into(),
        },
    )?;
    assert_eq!(record.status, OrderStatus::Disputed);
    // disputing must not commit stock
    assert_eq!(fx.inventory.stock_level(&fx.product_id), 100);

    let record = fx.step(
        &record,
        Role::Transporter,
        &fx.transporter_id,
        OrderStatus::ReturnToWholesaler,
        TransitionPayload::RequestReturn {
            return_reason: "damaged".into(),
        },
    )?;

    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::ReturnAccepted,
        TransitionPayload::None,
    )?;

    assert_eq!(record.status, OrderStatus::ReturnAccepted);
    assert!(record.return_details.as_ref().unwrap().return_decision_at.is_some());

    // restocked by exactly the order quantity, and redelivery of anything
    // still queued must not restock twice
    assert_eq!(fx.inventory.stock_level(&fx.product_id), 140);
    fx.engine.flush_effects()?;
    assert_eq!(fx.inventory.stock_level(&fx.product_id), 140);

    Ok(())
}

#[test]
fn concurrent_cancel_hits_stale_version() -> anyhow::Result<()> {
    let fx = fixture("stale_cancel.db")?;

    let record = fx.create_order(10)?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Accepted,
        TransitionPayload::None,
    )?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Processing,
        TransitionPayload::None,
    )?;
    assert_eq!(record.version, 3);

    // first cancel with the current version succeeds
    let cancelled = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::CancelledByRetailer,
        TransitionPayload::Cancel {
            cancellation_reason: "no longer needed".into(),
        },
    )?;
    assert_eq!(cancelled.version, 4);

    // a second attempt against the stale view is rejected
    let result = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::CancelledByRetailer,
        TransitionPayload::Cancel {
            cancellation_reason: "no longer needed".into(),
        },
    );

    assert!(matches!(
        result,
        Err(EngineError::StaleVersion {
            expected: 3,
            actual: 4
        })
    ));

    Ok(())
}

#[test]
fn rejected_order_can_be_deleted_but_never_revived() -> anyhow::Result<()> {
    let fx = fixture("reject_delete.db")?;

    let record = fx.create_order(10)?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Rejected,
        TransitionPayload::Reject {
            rejection_reason: "out of stock".into(),
        },
    )?;
    assert_eq!(record.rejection_reason.as_deref(), Some("out of stock"));

    // the retailer may tombstone a rejected order
    let record = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::Deleted,
        TransitionPayload::None,
    )?;
    assert_eq!(record.status, OrderStatus::Deleted);

    // the tombstone is still stored, not physically removed
    let stored = fx.engine.fetch(&record.id)?;
    assert_eq!(stored.status, OrderStatus::Deleted);

    // and nothing can bring it back to Pending or onward
    let result = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Accepted,
        TransitionPayload::None,
    );
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));

    Ok(())
}

#[test]
fn dispute_resolution_with_reassignment_restarts_the_transport_leg() -> anyhow::Result<()> {
    let fx = fixture("reassign.db")?;

    let record = fx.delivered_order(10)?;
    let record = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::Disputed,
        TransitionPayload::OpenDispute {
            reason: "left at wrong depot".into(),
        },
    )?;

    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Processing,
        TransitionPayload::ResolveDisputeWithReassignment {
            resolution_notes: "sending a different carrier".into(),
        },
    )?;

    assert_eq!(record.status, OrderStatus::Processing);
    assert!(record.transporter_id.is_none());
    // the closed dispute stays on the record as history
    let dispute = record.delivery_dispute.as_ref().unwrap();
    assert!(dispute.resolved_at.is_some());

    // a fresh transporter can now be assigned
    let second_transporter = utils::new_uuid_to_bech32("transporter_")?;
    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::AssignedToTransporter,
        TransitionPayload::AssignTransporter {
            transporter_id: second_transporter.clone(),
        },
    )?;
    assert_eq!(record.transporter_id.as_deref(), Some(second_transporter.as_str()));

    Ok(())
}

#[test]
fn dispute_resolution_in_place_keeps_the_order_disputed() -> anyhow::Result<()> {
    let fx = fixture("resolve_in_place.db")?;

    let record = fx.delivered_order(10)?;
    let record = fx.step(
        &record,
        Role::Retailer,
        &fx.retailer_id,
        OrderStatus::Disputed,
        TransitionPayload::OpenDispute {
            reason: "short ten units".into(),
        },
    )?;

    let record = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Disputed,
        TransitionPayload::ResolveDispute {
            resolution_notes: "credited the difference".into(),
        },
    )?;

    // resolved in place: the dispute closes but the status stays Disputed
    assert_eq!(record.status, OrderStatus::Disputed);
    let dispute = record.delivery_dispute.as_ref().unwrap();
    assert_eq!(
        dispute.resolution_notes.as_deref(),
        Some("credited the difference")
    );
    assert!(dispute.resolved_at.is_some());

    // a second resolution attempt is rejected
    let result = fx.step(
        &record,
        Role::Wholesaler,
        &fx.wholesaler_id,
        OrderStatus::Disputed,
        TransitionPayload::ResolveDispute {
            resolution_notes: "again".into(),
        },
    );
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));

    Ok(())
}

#[test]
fn view_history() -> anyhow::Result<()> {
    let fx = fixture("view_history.db")?;

    let record = fx.delivered_order(10)?;

    assert_eq!(record.history.len(), 5);
    assert_eq!(record.status, record.status_from_history());

    let rendered = record.format_history();
    assert_eq!(rendered.lines().count(), 5);
    assert!(rendered.contains("Pending -> Accepted"));
    assert!(rendered.contains("InTransit -> Delivered"));

    Ok(())
}
