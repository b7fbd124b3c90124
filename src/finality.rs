//! Handing fully-signed trades to the external finalizer (notary)
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::error::WorkflowError;
use super::signature::SignatureSet;
use super::trade::{TimeStamp, TradeRecord};

/// Proof that the finalizer committed a trade. Travels to the counterparty
/// inside the `Finalized` notice.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FinalityReceipt {
    #[n(0)]
    pub trade_id: String,
    #[n(1)]
    pub record_hash: String,
    #[n(2)]
    pub finalized_at: TimeStamp<Utc>,
}

/// The external commit service. Treated as opaque request/response.
pub trait Finalizer {
    fn finalize(
        &self,
        record: &TradeRecord,
        signatures: &SignatureSet,
        timeout: Duration,
    ) -> Result<FinalityReceipt, WorkflowError>;
}

/// Stand-in notary that keeps committed trade ids in memory.
///
/// A trade id can be committed once; committing the same record again returns
/// the original receipt, a different record under the same id is a conflict.
#[derive(Debug, Default)]
pub struct InMemoryNotary {
    committed: Mutex<HashMap<String, FinalityReceipt>>,
    latency: Duration,
    refusal: Option<String>,
}

impl InMemoryNotary {
    pub fn new() -> Self {
        Self::default()
    }
    /// Simulated commit latency; anything above the caller's timeout times out.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
    /// Refuse every commit with `reason`.
    pub fn refusing(mut self, reason: impl Into<String>) -> Self {
        self.refusal = Some(reason.into());
        self
    }
    pub fn receipt(&self, trade_id: &str) -> Option<FinalityReceipt> {
        self.committed.lock().get(trade_id).cloned()
    }
    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }
}

impl Finalizer for InMemoryNotary {
    fn finalize(
        &self,
        record: &TradeRecord,
        signatures: &SignatureSet,
        timeout: Duration,
    ) -> Result<FinalityReceipt, WorkflowError> {
        if self.latency > timeout {
            std::thread::sleep(timeout);
            warn!(trade_id = record.trade_id(), "notary did not answer in time");
            return Err(WorkflowError::timeout("finalization", timeout));
        }
        std::thread::sleep(self.latency);

        if let Some(reason) = &self.refusal {
            return Err(WorkflowError::FinalizationConflict(reason.clone()));
        }
        signatures.verify_all(record)?;
        let record_hash = record.hash()?;

        let mut committed = self.committed.lock();
        if let Some(existing) = committed.get(record.trade_id()) {
            if existing.record_hash == record_hash {
                return Ok(existing.clone());
            }
            return Err(WorkflowError::FinalizationConflict(format!(
                "trade {} is already committed with a different record",
                record.trade_id()
            )));
        }

        let receipt = FinalityReceipt {
            trade_id: record.trade_id().to_string(),
            record_hash,
            finalized_at: TimeStamp::new(),
        };
        committed.insert(receipt.trade_id.clone(), receipt.clone());
        info!(trade_id = %receipt.trade_id, hash = %receipt.record_hash, "trade committed");

        Ok(receipt)
    }
}
