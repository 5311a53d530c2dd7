//! Core of the task bot's Telegram delivery: callback tokens, menus, update dispatch, polling
//! loops and reminder sweeps.
//!
//! This crate is framework-agnostic. The Bot API client and the HTTP surface live in adapter
//! crates behind [`messaging::port::BotGateway`]; persistence sits behind [`store::TaskStore`].

pub mod audit;
pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod menu;
pub mod messaging;
pub mod notifier;
pub mod polling;
pub mod settings;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
