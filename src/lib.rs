//! Chatrelay streams generative-text answers into messaging conversations.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns per-conversation state (sessions, history, quota), the
//!   backend client and the cancellable stream generator.
//! - [`render`] turns a fragment stream into placeholder sends and in-place
//!   edits that respect the transport's message size limit.
//! - [`commands`] implements slash-command parsing and the session state
//!   machine behind them.
//! - [`relay`] routes inbound events to commands, generations and images and
//!   runs the long-polling loop.
//! - [`transport`] defines the messaging contract and the Telegram Bot API
//!   implementation of it.
//! - [`search`] optionally prepends web search context to a message.
//! - [`api`] defines the chat and image payloads sent to the backend.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod relay;
pub mod render;
pub mod search;
pub mod transport;
pub mod utils;
