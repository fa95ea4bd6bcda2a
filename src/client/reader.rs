//! The background reader: the single thread that owns the read half of the
//! transport, decodes frames, and dispatches them.
//!
//! Dispatch is deliberately cheap (completing a pending slot or mutating a
//! small set), so the reader never blocks behind a caller; callers instead
//! race their own timeout against their [`super::pending::PendingSlot`].

use std::io::BufRead;
use std::sync::Arc;

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, PublishDiagnosticsParams, WorkDoneProgress};
use tracing::{debug, warn};

use crate::frame::{read_message, FramingError};
use crate::jsonrpc::InboundMessage;

use super::state::SharedState;

/// Log target for reader-thread events.
pub(crate) const READER_TARGET: &str = "clangd_lsp_client::client::reader";

/// Runs the reader loop until the stream ends or a framing error occurs.
///
/// On a clean [`FramingError::Eof`] or any other fatal framing error, the
/// shared state transitions to `Failed` and every outstanding request is
/// cancelled, mirroring the client-wide failure policy for transport errors.
pub(crate) fn run<R: BufRead>(mut reader: R, shared: Arc<SharedState>) {
    loop {
        match read_message(&mut reader) {
            Ok(bytes) => dispatch(&bytes, &shared),
            Err(FramingError::Eof) => {
                debug!(target: READER_TARGET, "server closed its output stream");
                shared.fail_and_cancel();
                return;
            }
            Err(error) => {
                warn!(target: READER_TARGET, %error, "fatal framing error, shutting client down");
                shared.fail_and_cancel();
                return;
            }
        }
    }
}

fn dispatch(bytes: &[u8], shared: &Arc<SharedState>) {
    let message = match InboundMessage::from_bytes(bytes) {
        Ok(message) => message,
        Err(error) => {
            warn!(target: READER_TARGET, %error, "dropping message that failed to decode");
            return;
        }
    };

    match message {
        InboundMessage::Response { id, outcome } => {
            let completed = shared
                .pending
                .complete(id, outcome.map_err(super::pending::PendingFailure::Server));
            if !completed {
                debug!(target: READER_TARGET, id, "dropping response with no matching pending request");
            }
        }
        InboundMessage::Notification { method, params } => handle_notification(&method, params, shared),
        InboundMessage::ServerRequest { id, method } => {
            warn!(target: READER_TARGET, id, %method, "ignoring server-initiated request");
        }
    }
}

fn handle_notification(method: &str, params: serde_json::Value, shared: &Arc<SharedState>) {
    match method {
        "textDocument/publishDiagnostics" => {
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(diagnostics) => shared.readiness.mark_ready(diagnostics.uri),
                Err(error) => {
                    warn!(target: READER_TARGET, %error, "malformed publishDiagnostics params");
                }
            }
        }
        "$/progress" => match serde_json::from_value::<ProgressParams>(params) {
            Ok(progress) => apply_progress(shared, &progress),
            Err(error) => {
                warn!(target: READER_TARGET, %error, "malformed $/progress params");
            }
        },
        other => {
            debug!(target: READER_TARGET, method = other, "ignoring notification");
        }
    }
}

fn apply_progress(shared: &Arc<SharedState>, progress: &ProgressParams) {
    let token = token_key(&progress.token);
    match &progress.value {
        ProgressParamsValue::WorkDone(WorkDoneProgress::Begin(begin)) => {
            shared.readiness.apply_progress(
                &token,
                Some(begin.title.as_str()),
                crate::readiness::ProgressKind::Begin {
                    percentage: begin.percentage,
                    message: begin.message.clone().unwrap_or_default(),
                },
            );
        }
        ProgressParamsValue::WorkDone(WorkDoneProgress::Report(report)) => {
            shared.readiness.apply_progress(
                &token,
                None,
                crate::readiness::ProgressKind::Report {
                    percentage: report.percentage,
                    message: report.message.clone(),
                },
            );
        }
        ProgressParamsValue::WorkDone(WorkDoneProgress::End(_end)) => {
            shared.readiness.apply_progress(&token, None, crate::readiness::ProgressKind::End);
        }
    }
}

fn token_key(token: &NumberOrString) -> String {
    match token {
        NumberOrString::Number(value) => value.to_string(),
        NumberOrString::String(value) => value.clone(),
    }
}
