//! LSP client runtime bridging a tool surface to a `clangd` subprocess.
//!
//! [`Client`] owns one `clangd` process and speaks JSON-RPC over its stdio
//! pipes, framed per LSP's `Content-Length` header convention (see
//! [`frame`]). Requests are dispatched concurrently: a background thread
//! owns the read half of the transport and routes each inbound message to
//! whichever caller is waiting on its id, so a slow `workspace/symbol` never
//! blocks a concurrent `textDocument/hover`.
//!
//! [`Manager`] holds the process-wide singleton most embedders want: at
//! most one warm `clangd` per project root, started lazily on first use.
//! The [`query`] module is the thin, ergonomic surface built on top of
//! [`Client`]: it opens documents on demand and annotates ambiguous empty
//! results (call-hierarchy edges, `implementation`) with an indexing hint.

mod client;
mod config;
mod error;
mod frame;
mod jsonrpc;
mod manager;
mod readiness;

pub mod query;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Operation};
pub use manager::{canonical_root, Manager};
pub use query::Hinted;
pub use readiness::IndexingStatus;
