//! Sled-backed persistence for order records and the side-effect outbox
//!
//! Records are CBOR-encoded and committed against the exact bytes that were
//! read, so two callers racing on the same record cannot both win: the
//! loser's commit aborts and surfaces as `StaleVersion`. The updated record
//! and its derived descriptors land in one transaction across both trees,
//! so a committed status change always has its descriptors queued.
//! Orders are fully independent of one another, no cross-record lock exists.
use crate::effects::QueuedEffect;
use crate::error::EngineError;
use crate::record::OrderRecord;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, IVec, Tree};

const ORDERS_TREE: &str = "orders";
const OUTBOX_TREE: &str = "effects_outbox";

pub struct OrderStore {
    records: Tree,
    outbox: Tree,
}

impl OrderStore {
    pub fn open(db: &Db) -> Result<Self, EngineError> {
        Ok(Self {
            records: db.open_tree(ORDERS_TREE)?,
            outbox: db.open_tree(OUTBOX_TREE)?,
        })
    }

    /// Persist a freshly created record. Ids are uuid7-based so the key is
    /// never already present.
    pub fn insert_new(&self, record: &OrderRecord) -> Result<(), EngineError> {
        let bytes = minicbor::to_vec(record).map_err(EngineError::codec)?;
        self.records.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Load a record together with the raw bytes it was decoded from; the
    /// bytes are the witness for the later compare-and-swap.
    pub fn load(&self, order_id: &str) -> Result<(OrderRecord, IVec), EngineError> {
        let bytes = self
            .records
            .get(order_id.as_bytes())?
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;
        let record: OrderRecord = minicbor::decode(&bytes).map_err(EngineError::codec)?;
        Ok((record, bytes))
    }

    /// Commit an updated record and its derived descriptors in one
    /// transaction, guarded by the bytes observed at load time. If the
    /// stored bytes no longer match, another caller committed in between:
    /// the whole transaction aborts (nothing reaches the outbox) and the
    /// stored version is reported back for the `StaleVersion` error.
    pub fn commit_with_effects(
        &self,
        record: &OrderRecord,
        prior: IVec,
        expected_version: u64,
        effects: &[QueuedEffect],
    ) -> Result<(), EngineError> {
        let bytes = minicbor::to_vec(record).map_err(EngineError::codec)?;
        let mut encoded = Vec::with_capacity(effects.len());
        for queued in effects {
            encoded.push((
                queued.id.clone(),
                minicbor::to_vec(queued).map_err(EngineError::codec)?,
            ));
        }

        let outcome = (&self.records, &self.outbox).transaction(|(records, outbox)| {
            if records.get(record.id.as_bytes())?.as_ref() != Some(&prior) {
                return Err(ConflictableTransactionError::Abort(()));
            }
            records.insert(record.id.as_bytes(), bytes.as_slice())?;
            for (id, effect_bytes) in &encoded {
                outbox.insert(id.as_bytes(), effect_bytes.as_slice())?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => {
                let actual = self
                    .load(&record.id)
                    .map(|(stored, _)| stored.version)
                    .unwrap_or(expected_version);
                Err(EngineError::StaleVersion {
                    expected: expected_version,
                    actual,
                })
            }
            Err(TransactionError::Storage(err)) => Err(EngineError::Store(err)),
        }
    }

    /// Everything still awaiting delivery.
    pub fn queued_effects(&self) -> Result<Vec<QueuedEffect>, EngineError> {
        let mut out = vec![];
        for entry in self.outbox.iter() {
            let (_, bytes) = entry?;
            out.push(minicbor::decode(&bytes).map_err(EngineError::codec)?);
        }
        Ok(out)
    }

    /// Drop a delivered descriptor from the outbox.
    pub fn ack_effect(&self, effect_id: &str) -> Result<(), EngineError> {
        self.outbox.remove(effect_id.as_bytes())?;
        Ok(())
    }

    /// Every stored record, tombstones included.
    pub fn all_orders(&self) -> Result<Vec<OrderRecord>, EngineError> {
        let mut out = vec![];
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            out.push(minicbor::decode(&bytes).map_err(EngineError::codec)?);
        }
        Ok(out)
    }
}
