//! lmchat is a terminal client for OpenAI-compatible chat-completion servers.
//!
//! The crate is organized in a few layers:
//! - [`api`] defines the wire payloads and the [`api::ApiError`] kind shared by
//!   every request.
//! - [`core`] holds the protocol and state: the Server-Sent-Events decoder
//!   ([`core::sse`]), endpoint resolution, the streaming chat client
//!   ([`core::chat_stream`]), the conversation state machine
//!   ([`core::session`]) and persisted settings.
//! - [`cli`] is the command-line front end.
//! - [`utils`] has URL, header and transcript-log helpers.
//!
//! The binary (`src/main.rs`) only calls [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
