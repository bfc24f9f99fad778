//! Data models for CoinKit

mod alert;
mod event;
mod metric;

pub use alert::*;
pub use event::*;
pub use metric::*;
