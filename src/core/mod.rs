pub mod access;
pub mod backend;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod history;
pub mod message;
pub mod session;
pub mod store;
