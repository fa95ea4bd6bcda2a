//! Error types surfaced by the client, manager, and query surface.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::frame::FramingError;
use crate::jsonrpc::JsonRpcErrorObject;

/// The operation in flight when an error occurred, for caller-facing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Spawning the server subprocess.
    Spawn,
    /// The `initialize`/`initialized` handshake.
    Initialize,
    /// `textDocument/didOpen`.
    Open,
    /// `textDocument/didClose`.
    Close,
    /// `textDocument/definition`.
    Definition,
    /// `textDocument/references`.
    References,
    /// `textDocument/hover`.
    Hover,
    /// `textDocument/documentSymbol`.
    DocumentSymbol,
    /// `workspace/symbol`.
    WorkspaceSymbol,
    /// `textDocument/implementation`.
    Implementation,
    /// `textDocument/prepareCallHierarchy`.
    PrepareCallHierarchy,
    /// `callHierarchy/incomingCalls`.
    IncomingCalls,
    /// `callHierarchy/outgoingCalls`.
    OutgoingCalls,
    /// Waiting for a file to become ready.
    WaitForFile,
    /// The `shutdown`/`exit` sequence.
    Shutdown,
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Spawn => "spawn",
            Self::Initialize => "initialize",
            Self::Open => "didOpen",
            Self::Close => "didClose",
            Self::Definition => "definition",
            Self::References => "references",
            Self::Hover => "hover",
            Self::DocumentSymbol => "documentSymbol",
            Self::WorkspaceSymbol => "workspaceSymbol",
            Self::Implementation => "implementation",
            Self::PrepareCallHierarchy => "prepareCallHierarchy",
            Self::IncomingCalls => "incomingCalls",
            Self::OutgoingCalls => "outgoingCalls",
            Self::WaitForFile => "waitForFile",
            Self::Shutdown => "shutdown",
        };
        formatter.write_str(label)
    }
}

/// Errors returned by [`crate::Client`], [`crate::Manager`], and the query
/// surface functions in [`crate::query`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Bytes from the server could not be framed as an LSP message.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The server closed its stdout.
    #[error("language server closed its output stream")]
    TransportEof,

    /// A message arrived that violated the protocol (e.g. a response with no
    /// matching pending request, or JSON that did not decode as expected).
    #[error("protocol error during {operation}: {detail}")]
    Protocol {
        /// Operation in progress when the violation was observed.
        operation: Operation,
        /// Description of the violation.
        detail: String,
    },

    /// The server returned a JSON-RPC error object.
    #[error("language server returned an error during {operation}: {message} (code {code})")]
    Server {
        /// Operation that failed.
        operation: Operation,
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },

    /// The request's deadline elapsed before a response arrived.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that timed out.
        operation: Operation,
        /// The configured timeout, in seconds.
        timeout_secs: u64,
    },

    /// The operation was aborted because the client is shutting down.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        operation: Operation,
    },

    /// The client has not completed its `initialize` handshake, or has
    /// already moved past `Ready` (shutting down, closed, or failed).
    #[error("client is not ready for {operation} (state: {state})")]
    NotReady {
        /// Operation the caller attempted.
        operation: Operation,
        /// Human-readable name of the current state.
        state: &'static str,
    },

    /// A position query targeted a URI that was never opened.
    #[error("document not open: {uri}")]
    NotOpen {
        /// The URI that was not open.
        uri: String,
    },

    /// `open` was called twice for the same URI without an intervening
    /// `close`.
    #[error("document already open: {uri}")]
    AlreadyOpen {
        /// The URI that was already open.
        uri: String,
    },

    /// The manager already holds a client bound to a different project root.
    #[error("manager is bound to '{bound}'; cannot rebind to '{requested}' without reset")]
    ProjectMismatch {
        /// The root the live client is bound to.
        bound: String,
        /// The root the caller requested.
        requested: String,
    },

    /// The server subprocess could not be started.
    #[error("failed to spawn language server '{command}': {detail}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// Description of the failure.
        detail: String,
        /// The underlying I/O error, when one is available.
        #[source]
        source: Option<io::Error>,
    },

    /// An unrecoverable failure; the client has transitioned to `Failed`.
    #[error("fatal client error: {0}")]
    Fatal(String),
}

impl ClientError {
    /// Builds a [`ClientError::Server`] from a decoded JSON-RPC error object.
    #[must_use]
    pub fn from_jsonrpc(operation: Operation, error: JsonRpcErrorObject) -> Self {
        Self::Server {
            operation,
            code: error.code,
            message: error.message,
        }
    }
}
