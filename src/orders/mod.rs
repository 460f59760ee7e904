//! Order Management Module
//!
//! Order records, the per-symbol active order book and its reconciliation
//! against the venue.
//!
//! # Architecture
//!
//! - `ActiveOrderBook` - Thread-safe view of one symbol's live orders
//! - `ActiveOrderReconciler` - Repairs book drift from venue queries
//! - Core types - `OrderId`, `OrderStatus`, `SubmitOrder`, `Order`, `Trade`
//!
//! # Example
//!
//! ```ignore
//! use orderflow::orders::ActiveOrderBook;
//!
//! let book = ActiveOrderBook::new("BTCUSDT");
//! let _subscription = book.bind(&stream);
//! for order in exchange.submit_orders(&requests).await? {
//!     book.add(order);
//! }
//! ```

mod active_book;
mod reconciler;
mod types;

pub use active_book::{ActiveOrderBook, UpdateOutcome};
pub use reconciler::{
    ActiveOrderReconciler, LookupFailure, ReconcileError, ReconcilerConfig, ReconciliationReport,
};
pub use types::{Order, OrderId, OrderStatus, SubmitOrder, Trade};
