pub mod comm;
pub mod common;
pub mod config;
pub mod exchange;
pub mod mp;
pub mod pke;
pub mod store;
pub mod wire;

pub use common::{KexError, Result};
pub use exchange::{ExchangeState, KeyExchange, Suite};
