//! Market-maker core: configuration, ledgers, signals, quoting, and the loop.

pub mod bot;
pub mod config;
pub mod pnl;
pub mod position;
pub mod quoter;
pub mod throttle;
pub mod volatility;
