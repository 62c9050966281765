pub mod conversation;
pub mod protocol;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod sse_parser;
pub mod types;
