use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{ActiveSignal, Position};

/// One entry in the process-wide active-position registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPosition {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub position: Position,
    pub price_open: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl From<&ActiveSignal> for OpenPosition {
    fn from(signal: &ActiveSignal) -> Self {
        Self {
            id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            strategy_name: signal.strategy_name.clone(),
            exchange_name: signal.exchange_name.clone(),
            position: signal.position,
            price_open: signal.price_open,
            opened_at: signal.pending_at,
        }
    }
}

/// Process-wide registry of active positions across all strategies.
///
/// Mutated only through `admit`/`retire` (the risk gate's admit path and
/// the engine's close path); updates are serialized behind one lock.
#[derive(Debug, Default)]
pub struct Portfolio {
    positions: Mutex<HashMap<String, OpenPosition>>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, position: OpenPosition) {
        self.positions
            .lock()
            .unwrap()
            .insert(position.id.clone(), position);
    }

    pub fn retire(&self, id: &str) -> Option<OpenPosition> {
        self.positions.lock().unwrap().remove(id)
    }

    /// Point-in-time copy used by risk validators.
    pub fn snapshot(&self) -> Vec<OpenPosition> {
        let mut positions: Vec<OpenPosition> =
            self.positions.lock().unwrap().values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        positions
    }

    pub fn count(&self) -> usize {
        self.positions.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.lock().unwrap().contains_key(id)
    }
}
