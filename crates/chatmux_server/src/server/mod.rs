#![forbid(unsafe_code)]

pub mod context;
pub mod fanout;
pub mod health;
pub mod http;
pub mod ingest;
pub mod rewriter;
pub mod session;
pub mod store;
pub mod stream;
