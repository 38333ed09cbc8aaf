use rust_decimal::Decimal;

/// One-shot percent milestones from entry.
///
/// Each configured level fires at most once per signal, on the first
/// evaluation that sees it crossed. Levels are favorable-positive percent
/// for profit and magnitude-of-drawdown percent for loss.
#[derive(Debug, Clone)]
pub struct PartialTracker {
    profit_levels: Vec<Decimal>,
    loss_levels: Vec<Decimal>,
    fired_profit: Vec<Decimal>,
    fired_loss: Vec<Decimal>,
}

impl PartialTracker {
    pub fn new(profit_levels: Vec<Decimal>, loss_levels: Vec<Decimal>) -> Self {
        Self {
            profit_levels,
            loss_levels,
            fired_profit: Vec::new(),
            fired_loss: Vec::new(),
        }
    }

    /// Newly crossed profit levels for the given unrealized percent,
    /// ascending. Marks them fired.
    pub fn crossed_profit(&mut self, unrealized_pct: Decimal) -> Vec<Decimal> {
        let mut crossed: Vec<Decimal> = self
            .profit_levels
            .iter()
            .copied()
            .filter(|level| unrealized_pct >= *level && !self.fired_profit.contains(level))
            .collect();
        crossed.sort();
        self.fired_profit.extend(crossed.iter().copied());
        crossed
    }

    /// Newly crossed loss levels (unrealized percent is negative when
    /// losing), ascending by magnitude. Marks them fired.
    pub fn crossed_loss(&mut self, unrealized_pct: Decimal) -> Vec<Decimal> {
        let drawdown = -unrealized_pct;
        let mut crossed: Vec<Decimal> = self
            .loss_levels
            .iter()
            .copied()
            .filter(|level| drawdown >= *level && !self.fired_loss.contains(level))
            .collect();
        crossed.sort();
        self.fired_loss.extend(crossed.iter().copied());
        crossed
    }
}

/// Stop-loss-to-entry migration, armed once per signal.
#[derive(Debug, Clone, Default)]
pub struct BreakevenTracker {
    fired: bool,
}

impl BreakevenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild tracker state from a restored signal (a stop-loss already
    /// sitting at entry means the migration fired before the restart).
    pub fn restored(fired: bool) -> Self {
        Self { fired }
    }

    /// True exactly once: the first time unrealized profit covers the
    /// trigger threshold.
    pub fn should_trigger(&mut self, unrealized_pct: Decimal, trigger_pct: Decimal) -> bool {
        if self.fired || unrealized_pct <= trigger_pct {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}
