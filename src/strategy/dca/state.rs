//! Phases, position accounting and snapshots of the DCA cycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::Trade;
use crate::types::{Market, OrderSide};

/// Phase of one accumulate-then-exit round.
///
/// The normal path is cyclic:
/// `WaitToOpenPosition -> PositionOpening -> OpenPositionReady ->
/// OpenPositionOrderFilled -> OpenPositionOrdersCancelling ->
/// OpenPositionOrdersCancelled -> TakeProfitReady -> WaitToOpenPosition`.
/// `None` is the state of a freshly built strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    None,
    WaitToOpenPosition,
    PositionOpening,
    OpenPositionReady,
    OpenPositionOrderFilled,
    OpenPositionOrdersCancelling,
    OpenPositionOrdersCancelled,
    TakeProfitReady,
}

impl Phase {
    /// The single phase this one may move to.
    pub fn successor(self) -> Phase {
        match self {
            Phase::None => Phase::WaitToOpenPosition,
            Phase::WaitToOpenPosition => Phase::PositionOpening,
            Phase::PositionOpening => Phase::OpenPositionReady,
            Phase::OpenPositionReady => Phase::OpenPositionOrderFilled,
            Phase::OpenPositionOrderFilled => Phase::OpenPositionOrdersCancelling,
            Phase::OpenPositionOrdersCancelling => Phase::OpenPositionOrdersCancelled,
            Phase::OpenPositionOrdersCancelled => Phase::TakeProfitReady,
            Phase::TakeProfitReady => Phase::WaitToOpenPosition,
        }
    }

    /// True between opening a position and closing the round, where
    /// progress depends on orders living on the venue.
    pub fn is_mid_round(self) -> bool {
        !matches!(self, Phase::None | Phase::WaitToOpenPosition)
    }

    pub fn is_legal(self, next: Phase) -> bool {
        self.successor() == next
    }

    /// Request raised by the periodic timer from this phase.
    ///
    /// Phases left by a fill or a candle return `None`: their transitions
    /// are requested by stream callbacks.
    pub fn timer_request(self) -> Option<Phase> {
        match self {
            Phase::None
            | Phase::WaitToOpenPosition
            | Phase::PositionOpening
            | Phase::OpenPositionOrdersCancelling
            | Phase::OpenPositionOrdersCancelled => Some(self.successor()),
            Phase::OpenPositionReady | Phase::OpenPositionOrderFilled | Phase::TakeProfitReady => None,
        }
    }

    /// Follow-up requested right after committing into this phase.
    pub fn follow_up(self) -> Option<Phase> {
        match self {
            Phase::OpenPositionOrdersCancelling => Some(Phase::OpenPositionOrdersCancelled),
            Phase::OpenPositionOrdersCancelled => Some(Phase::TakeProfitReady),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::None => "None",
            Phase::WaitToOpenPosition => "WaitToOpenPosition",
            Phase::PositionOpening => "PositionOpening",
            Phase::OpenPositionReady => "OpenPositionReady",
            Phase::OpenPositionOrderFilled => "OpenPositionOrderFilled",
            Phase::OpenPositionOrdersCancelling => "OpenPositionOrdersCancelling",
            Phase::OpenPositionOrdersCancelled => "OpenPositionOrdersCancelled",
            Phase::TakeProfitReady => "TakeProfitReady",
        }
    }

    pub const ALL: [Phase; 8] = [
        Phase::None,
        Phase::WaitToOpenPosition,
        Phase::PositionOpening,
        Phase::OpenPositionReady,
        Phase::OpenPositionOrderFilled,
        Phase::OpenPositionOrdersCancelling,
        Phase::OpenPositionOrdersCancelled,
        Phase::TakeProfitReady,
    ];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one transition request.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The phase moved to the requested successor.
    Committed,
    /// Not the legal successor of the current phase; nothing changed.
    Rejected,
    /// Legal, but its side effect failed or its gate is closed; the phase
    /// stays put until the next trigger.
    Held,
}

/// Base and quote accrued during the current round.
///
/// `quote` is the net quote flow: buys and quote fees make it negative,
/// the take-profit sale brings it back above zero when the round wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub base: Decimal,
    pub quote: Decimal,
}

impl Position {
    pub fn apply_trade(&mut self, trade: &Trade, market: &Market) {
        match trade.side {
            OrderSide::Buy => {
                self.base += trade.quantity;
                self.quote -= trade.quote_quantity;
            }
            OrderSide::Sell => {
                self.base -= trade.quantity;
                self.quote += trade.quote_quantity;
            }
        }

        if trade.fee_currency == market.quote_currency {
            self.quote -= trade.fee;
        } else if trade.fee_currency == market.base_currency {
            self.base -= trade.fee;
        }
    }

    /// Quote paid per unit of base held, fees included.
    pub fn average_cost(&self) -> Option<Decimal> {
        if self.base <= Decimal::ZERO || self.quote >= Decimal::ZERO {
            return None;
        }
        Some(-self.quote / self.base)
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_zero() && self.quote.is_zero()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Take-profit fill progress. The round may only close once every traded
/// unit of the filled order has been booked into the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TakeProfitProgress {
    /// Executed quantity reported by the order's Filled update
    pub filled_quantity: Option<Decimal>,
    /// Sum of the take-profit trades booked so far
    pub traded_quantity: Decimal,
}

impl TakeProfitProgress {
    pub fn is_complete(&self) -> bool {
        self.filled_quantity
            .is_some_and(|filled| self.traded_quantity >= filled)
    }
}

/// Restart-recoverable view of a DCA strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaSnapshot {
    pub phase: Phase,
    pub budget: Decimal,
    pub position: Position,
    pub next_round_at: DateTime<Utc>,
    pub round: u64,
    #[serde(default)]
    pub take_profit: TakeProfitProgress,
}
