pub mod chat_stream;
pub mod config;
pub mod endpoint;
pub mod session;
pub mod sse;
