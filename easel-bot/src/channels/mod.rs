//! Gateway implementations for various messaging platforms.
//!
//! # Available Gateways
//!
//! - [`cli::CliGateway`] - terminal gateway (always available)
//! - [`memory::MemoryGateway`] - in-memory gateway recording every call
//! - [`telegram::TelegramGateway`] - Telegram bot (requires `telegram` feature)
//!
//! # Feature Flags
//!
//! - `telegram` - Enable Telegram support via teloxide

pub mod cli;
pub mod memory;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use cli::{CliGateway, CliGatewayConfig};
pub use memory::{GatewayEvent, MemoryGateway};

#[cfg(feature = "telegram")]
pub use telegram::{TelegramGateway, TelegramGatewayConfig};
