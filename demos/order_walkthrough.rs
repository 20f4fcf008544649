use order_lifecycle::{
    effects::{InMemoryInventory, InMemoryNotifier},
    engine::{OrderEngine, TransitionPayload, TransitionRequest},
    record::{NewOrder, OrderStatus, Role},
    utils,
};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let db = sled::open("orders_demo")?;
    if !db.is_empty() {
        db.clear()?;
    }
    let db = Arc::new(db);

    let inventory = Arc::new(InMemoryInventory::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = OrderEngine::new(db, inventory.clone(), notifier.clone())?;

    let retailer_id = utils::new_uuid_to_bech32("retailer_")?;
    let wholesaler_id = utils::new_uuid_to_bech32("wholesaler_")?;
    let transporter_id = utils::new_uuid_to_bech32("transporter_")?;
    let product_id = utils::new_uuid_to_bech32("product_")?;

    inventory.set_stock(&product_id, 500);

    // retailer raises a purchase request
    let record = engine.create_order(NewOrder {
        retailer_id: retailer_id.clone(),
        wholesaler_id: wholesaler_id.clone(),
        product_id: product_id.clone(),
        quantity: 120,
        unit_price: 35,
        measurement_unit: "kg".into(),
    })?;

    // wholesaler takes it through acceptance and hands it to a transporter
    let steps: Vec<(Role, &str, OrderStatus, TransitionPayload)> = vec![
        (
            Role::Wholesaler,
            wholesaler_id.as_str(),
            OrderStatus::Accepted,
            TransitionPayload::None,
        ),
        (
            Role::Wholesaler,
            wholesaler_id.as_str(),
            OrderStatus::Processing,
            TransitionPayload::None,
        ),
        (
            Role::Wholesaler,
            wholesaler_id.as_str(),
            OrderStatus::AssignedToTransporter,
            TransitionPayload::AssignTransporter {
                transporter_id: transporter_id.clone(),
            },
        ),
        (
            Role::Transporter,
            transporter_id.as_str(),
            OrderStatus::AcceptedByTransporter,
            TransitionPayload::None,
        ),
        (
            Role::Transporter,
            transporter_id.as_str(),
            OrderStatus::InTransit,
            TransitionPayload::None,
        ),
        (
            Role::Transporter,
            transporter_id.as_str(),
            OrderStatus::Delivered,
            TransitionPayload::None,
        ),
        (
            Role::Retailer,
            retailer_id.as_str(),
            OrderStatus::Certified,
            TransitionPayload::None,
        ),
    ];

    let mut record = record;
    for (role, actor_id, target, payload) in steps {
        record = engine.request_transition(TransitionRequest {
            order_id: record.id.clone(),
            actor_role: role,
            actor_id: actor_id.to_string(),
            expected_version: record.version,
            target_status: target,
            payload,
        })?;
        println!("-> {:?} (v{})", record.status, record.version);
    }

    println!("\naudit trail:\n{}", record.format_history());
    println!("stock after certification: {}", inventory.stock_level(&product_id));

    Ok(())
}
