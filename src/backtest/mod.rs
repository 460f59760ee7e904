//! Backtest venue.
//!
//! A deterministic stand-in for a real exchange: resting limit orders fill
//! when replayed prices reach them, balances are locked and settled, and the
//! usual order/trade/candle events are published on a [`Stream`].
//!
//! [`Stream`]: crate::exchange::Stream

mod account;
mod book;
mod exchange;
mod matching;
mod replay;

pub use account::{Account, Balance};
pub use book::RestingBook;
pub use exchange::{BacktestConfig, BacktestExchange};
pub use matching::{FeeSchedule, Fill, IdSequence, SimplePriceMatching};
pub use replay::{KLineReplay, ReplayError, ReplaySummary};
