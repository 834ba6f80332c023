//! A single escalating-price title and the ledger it settles against.
//!
//! * [`monarchy`] — the title itself: claim, renounce, pause and fee sweeps.
//! * [`ledger`] — native-currency balances with all-or-nothing transfer batches.
//! * [`kingdom`] — the two bundled together behind one lock, plus the JSON
//!   state file.
//! * [`identity`] — addresses and the key material behind them.

pub mod identity;
pub mod kingdom;
pub mod ledger;
pub mod monarchy;
