//! The client's lifecycle state machine and the state shared between the
//! public [`super::Client`] handle and its background reader thread.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use lsp_types::Uri;

use crate::error::{ClientError, Operation};
use crate::readiness::ReadinessState;

use super::pending::PendingTable;

/// Lifecycle states a [`super::Client`] moves through.
///
/// Transitions are monotonic: `Created -> Starting -> Initializing -> Ready
/// -> ShuttingDown -> Closed`, or `Created -> Failed` from any state when a
/// fatal transport error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, not yet started.
    Created,
    /// The subprocess has been spawned; the `initialize` handshake has not
    /// completed.
    Starting,
    /// `initialize` was sent; awaiting its response.
    Initializing,
    /// Fully initialised; all operations are permitted.
    Ready,
    /// `shutdown`/`exit` is in progress.
    ShuttingDown,
    /// Cleanly shut down.
    Closed,
    /// A fatal transport error occurred.
    Failed,
}

impl ClientState {
    /// Human-readable name, used in [`ClientError::NotReady`].
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// The writer half: a single lock serialises id allocation, pending-table
/// insertion, and the outgoing write, so ids appear on the wire in
/// allocation order and a response can never arrive before its slot exists.
pub(super) struct Writer {
    pub(super) sink: Box<dyn Write + Send>,
    pub(super) next_id: i64,
}

/// State shared between the [`super::Client`] handle and the reader thread.
pub(super) struct SharedState {
    pub(super) lifecycle: Mutex<ClientState>,
    pub(super) writer: Mutex<Writer>,
    pub(super) pending: PendingTable,
    pub(super) readiness: ReadinessState,
    pub(super) open_documents: Mutex<HashSet<Uri>>,
    pub(super) project_root: PathBuf,
    pub(super) request_timeout: Duration,
}

impl SharedState {
    /// Transitions to `Failed` and cancels every outstanding request; called
    /// by the reader thread when the transport breaks.
    pub(super) fn fail_and_cancel(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *lifecycle = ClientState::Failed;
        drop(lifecycle);
        self.pending.cancel_all();
    }

    /// Returns the current lifecycle state.
    pub(super) fn state(&self) -> ClientState {
        *self.lifecycle.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sets the lifecycle state.
    pub(super) fn set_state(&self, next: ClientState) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *lifecycle = next;
    }

    /// Fails fast with [`ClientError::NotReady`] unless the client is
    /// `Ready`.
    pub(super) fn require_ready(&self, operation: Operation) -> Result<(), ClientError> {
        let state = self.state();
        if state == ClientState::Ready {
            Ok(())
        } else {
            Err(ClientError::NotReady {
                operation,
                state: state.label(),
            })
        }
    }
}
