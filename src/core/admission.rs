//! Per-request admission decision.

use std::sync::Arc;

use crate::core::block_registry::BlockRegistry;
use crate::core::ledger::SourceLedger;

/// Outcome of admitting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Served,
    Rejected,
}

impl Admission {
    pub fn is_served(&self) -> bool {
        matches!(self, Admission::Served)
    }
}

/// Enforces block decisions on inbound requests.
///
/// Every request counts as an attempt; only requests from sources that are
/// not blocked count as served.
#[derive(Clone)]
pub struct AdmissionGate {
    ledger: Arc<SourceLedger>,
    registry: Arc<BlockRegistry>,
}

impl AdmissionGate {
    pub fn new(ledger: Arc<SourceLedger>, registry: Arc<BlockRegistry>) -> Self {
        Self { ledger, registry }
    }

    pub fn admit(&self, source: &str) -> Admission {
        self.ledger.record_attempt(source);
        if self.registry.contains(source) {
            metrics::increment_counter!("flow_shield_requests_rejected_total");
            return Admission::Rejected;
        }
        self.ledger.record_served(source);
        metrics::increment_counter!("flow_shield_requests_served_total");
        Admission::Served
    }

    pub fn ledger(&self) -> &Arc<SourceLedger> {
        &self.ledger
    }
}
