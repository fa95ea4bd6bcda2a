//! File-readiness and indexing-status state shared between the reader
//! thread and callers.
//!
//! LSP has no native "this file is indexed" event. The client approximates
//! readiness by treating the first `textDocument/publishDiagnostics` batch
//! for a URI as a readiness edge, and separately tracks background-indexing
//! progress reported via `$/progress`.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use lsp_types::Uri;

/// Rollup of the most recently observed indexing `$/progress` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStatus {
    /// Whether an indexing/background-work progress stream is currently
    /// between its `begin` and `end` notifications.
    pub in_progress: bool,
    /// The last reported completion percentage, if the server sent one.
    pub percentage: Option<u32>,
    /// The last reported progress message.
    pub message: String,
}

impl IndexingStatus {
    /// Renders the status the way the query surface's status accessor
    /// reports it: `"idle"`, `"indexing"`, or `"indexing (NN%)"`.
    #[must_use]
    pub fn as_status_string(&self) -> String {
        if !self.in_progress {
            return "idle".to_string();
        }
        match self.percentage {
            Some(percentage) => format!("indexing ({percentage}%)"),
            None => "indexing".to_string(),
        }
    }
}

/// Tracks which work-done-progress token, if any, is the one currently
/// driving [`IndexingStatus`], so unrelated progress streams (e.g. a
/// formatting operation) are not misclassified as indexing.
#[derive(Debug, Default)]
struct ProgressTracker {
    status: IndexingStatus,
    active_token: Option<String>,
}

/// A title names indexing/background work if it mentions either word,
/// case-insensitively.
fn title_is_indexing(title: &str) -> bool {
    let lower = title.to_ascii_lowercase();
    lower.contains("index") || lower.contains("background")
}

/// Shared readiness state: the file-ready set, its waiters, and the
/// indexing-status rollup.
pub struct ReadinessState {
    ready: Mutex<HashSet<Uri>>,
    ready_signal: Condvar,
    progress: Mutex<ProgressTracker>,
}

impl ReadinessState {
    /// Creates empty readiness state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(HashSet::new()),
            ready_signal: Condvar::new(),
            progress: Mutex::new(ProgressTracker::default()),
        }
    }

    /// Records that diagnostics have been published for `uri`, and wakes any
    /// caller blocked in [`Self::wait_for_file`] on it.
    pub fn mark_ready(&self, uri: Uri) {
        let mut ready = self.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        ready.insert(uri);
        drop(ready);
        self.ready_signal.notify_all();
    }

    /// Returns whether `uri` has already received at least one diagnostics
    /// batch.
    #[must_use]
    pub fn is_ready(&self, uri: &Uri) -> bool {
        let ready = self.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        ready.contains(uri)
    }

    /// Blocks until `uri` becomes ready or `timeout` elapses.
    ///
    /// Returns `true` if the URI was (or became) ready, `false` on timeout.
    #[must_use]
    pub fn wait_for_file(&self, uri: &Uri, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while !ready.contains(uri) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self
                .ready_signal
                .wait_timeout(ready, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            ready = guard;
            if result.timed_out() && !ready.contains(uri) {
                return false;
            }
        }
        true
    }

    /// Applies a `$/progress` notification, updating the indexing-status
    /// rollup when the stream's title names indexing/background work.
    pub fn apply_progress(&self, token: &str, title_for_begin: Option<&str>, kind: ProgressKind) {
        let mut tracker = self
            .progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match kind {
            ProgressKind::Begin { percentage, message } => {
                let Some(title) = title_for_begin else {
                    return;
                };
                if !title_is_indexing(title) {
                    return;
                }
                tracker.active_token = Some(token.to_string());
                tracker.status = IndexingStatus {
                    in_progress: true,
                    percentage,
                    message,
                };
            }
            ProgressKind::Report { percentage, message } => {
                if tracker.active_token.as_deref() != Some(token) {
                    return;
                }
                if let Some(percentage) = percentage {
                    tracker.status.percentage = Some(percentage);
                }
                if let Some(message) = message {
                    tracker.status.message = message;
                }
            }
            ProgressKind::End => {
                if tracker.active_token.as_deref() != Some(token) {
                    return;
                }
                tracker.active_token = None;
                tracker.status.in_progress = false;
                tracker.status.percentage = None;
            }
        }
    }

    /// Returns the current indexing status.
    #[must_use]
    pub fn indexing_status(&self) -> IndexingStatus {
        self.progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .status
            .clone()
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

/// The three `$/progress` notification shapes the client tracks.
#[derive(Debug, Clone)]
pub enum ProgressKind {
    /// `kind = "begin"`.
    Begin {
        /// Initial percentage, if reported.
        percentage: Option<u32>,
        /// Initial message, if reported.
        message: String,
    },
    /// `kind = "report"`.
    Report {
        /// Updated percentage, if reported.
        percentage: Option<u32>,
        /// Updated message, if reported.
        message: Option<String>,
    },
    /// `kind = "end"`.
    End,
}
