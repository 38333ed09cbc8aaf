use rust_decimal::Decimal;

use crate::config::Settings;
use crate::types::Position;

/// Realized-PnL math with slippage and fees on both sides of the trade.
///
/// Costs are held as fractions internally; the public surface speaks
/// percent like the rest of the engine.
#[derive(Debug, Clone, Copy)]
pub struct PnlCalculator {
    /// Combined per-side cost as a fraction (slippage + fee).
    cost: Decimal,
}

impl PnlCalculator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            cost: (settings.percent_slippage + settings.percent_fee) / Decimal::from(100),
        }
    }

    /// Entry fill after adverse slippage and fee: a long pays up, a short
    /// receives less.
    pub fn effective_open(&self, position: Position, price_open: Decimal) -> Decimal {
        match position {
            Position::Long => price_open * (Decimal::ONE + self.cost),
            Position::Short => price_open * (Decimal::ONE - self.cost),
        }
    }

    /// Exit fill after adverse slippage and fee.
    pub fn effective_close(&self, position: Position, price_close: Decimal) -> Decimal {
        match position {
            Position::Long => price_close * (Decimal::ONE - self.cost),
            Position::Short => price_close * (Decimal::ONE + self.cost),
        }
    }

    /// Realized percent for a full close at `price_close`.
    pub fn pnl_percent(
        &self,
        position: Position,
        price_open: Decimal,
        price_close: Decimal,
    ) -> Decimal {
        let hundred = Decimal::from(100);
        match position {
            Position::Long => {
                let entry = self.effective_open(Position::Long, price_open);
                let exit = self.effective_close(Position::Long, price_close);
                if entry.is_zero() {
                    return Decimal::ZERO;
                }
                (exit / entry - Decimal::ONE) * hundred
            }
            Position::Short => {
                let entry = self.effective_open(Position::Short, price_open);
                let exit = self.effective_close(Position::Short, price_close);
                if exit.is_zero() {
                    return Decimal::ZERO;
                }
                (entry / exit - Decimal::ONE) * hundred
            }
        }
    }
}

/// Accumulates partial closures so the final close blends them
/// proportionally into one realized percent.
#[derive(Debug, Clone, Default)]
pub struct PartialLedger {
    /// Fraction of the original size already closed, 0..=1.
    closed_fraction: Decimal,
    /// Sum of `fraction_i * pnl_percent_i` over the partial closes.
    realized_contribution_pct: Decimal,
}

impl PartialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a restored `partialClosedPct`. The realized contribution
    /// of pre-restart partials is not on the wire and starts at zero.
    pub fn from_closed_pct(closed_pct: Decimal) -> Self {
        Self {
            closed_fraction: (closed_pct / Decimal::from(100))
                .clamp(Decimal::ZERO, Decimal::ONE),
            realized_contribution_pct: Decimal::ZERO,
        }
    }

    /// Record a partial close of `pct` percent of the original size at the
    /// given realized percent. Returns the fraction actually closed (capped
    /// so the total never exceeds the full size).
    pub fn record(&mut self, pct: Decimal, pnl_pct: Decimal) -> Decimal {
        let requested = (pct / Decimal::from(100)).max(Decimal::ZERO);
        let available = Decimal::ONE - self.closed_fraction;
        let fraction = requested.min(available);
        self.closed_fraction += fraction;
        self.realized_contribution_pct += fraction * pnl_pct;
        fraction
    }

    pub fn closed_pct(&self) -> Decimal {
        self.closed_fraction * Decimal::from(100)
    }

    pub fn remaining_fraction(&self) -> Decimal {
        Decimal::ONE - self.closed_fraction
    }

    /// Blend the final close of the remaining size with the recorded
    /// partials.
    pub fn blended_pnl_pct(&self, final_pnl_pct: Decimal) -> Decimal {
        self.realized_contribution_pct + self.remaining_fraction() * final_pnl_pct
    }
}
