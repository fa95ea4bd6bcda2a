//! The LSP client: owns the server subprocess, correlates concurrent
//! requests to their responses, and tracks readiness state pushed by the
//! server.

mod pending;
mod reader;
mod state;

use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyIncomingCallsParams, CallHierarchyItem,
    CallHierarchyOutgoingCall, CallHierarchyOutgoingCallsParams, CallHierarchyPrepareParams,
    ClientCapabilities, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DocumentSymbolParams, DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse,
    Hover, HoverParams, InitializeParams, InitializeResult, InitializedParams, Location, Position,
    ReferenceContext, ReferenceParams, SymbolInformation, TextDocumentClientCapabilities,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Uri, WorkDoneProgressParams,
    WorkspaceSymbolParams, WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Operation};
use crate::frame::write_message;
use crate::jsonrpc::JsonRpcRequest;
use crate::readiness::IndexingStatus;

use pending::{PendingFailure, PendingTable};
use state::{ClientState, SharedState, Writer};

/// Log target for client-level events.
const CLIENT_TARGET: &str = "clangd_lsp_client::client";

/// A running LSP client bound to one project root.
///
/// Construct with [`Client::start`]; operations beyond `start`/`shutdown`
/// only succeed once the client has reached the `Ready` state.
pub struct Client {
    shared: Arc<SharedState>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
}

impl Client {
    /// Spawns the configured server and completes the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Spawn`] if the server binary cannot be
    /// started, or the errors `initialize` itself can raise (`Timeout`,
    /// `Server`, `Protocol`, `Framing`).
    pub fn start(config: &ClientConfig) -> Result<Self, ClientError> {
        let (child, reader, writer) = spawn_process(config)?;
        Self::start_with_transport(
            config.project_root.clone(),
            config.request_timeout,
            Box::new(reader),
            Box::new(writer),
            Some(child),
        )
    }

    /// Builds a client over an already-connected transport and completes the
    /// `initialize` handshake.
    ///
    /// This is the injection point used by tests (and by any embedder that
    /// talks to a server over something other than a spawned subprocess,
    /// e.g. a pre-connected socket). `child`, when present, is killed on
    /// [`Client::shutdown`] and on [`Drop`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Client::start`], minus [`ClientError::Spawn`].
    pub fn start_with_transport(
        project_root: PathBuf,
        request_timeout: Duration,
        reader: Box<dyn BufRead + Send>,
        writer: Box<dyn Write + Send>,
        child: Option<Child>,
    ) -> Result<Self, ClientError> {
        let shared = Arc::new(SharedState {
            lifecycle: Mutex::new(ClientState::Created),
            writer: Mutex::new(Writer { sink: writer, next_id: 1 }),
            pending: PendingTable::new(),
            readiness: crate::readiness::ReadinessState::new(),
            open_documents: Mutex::new(HashSet::new()),
            project_root,
            request_timeout,
        });

        shared.set_state(ClientState::Starting);

        let reader_shared = Arc::clone(&shared);
        let reader_handle = thread::spawn(move || reader::run(reader, reader_shared));

        let client = Self {
            shared,
            reader_handle: Mutex::new(Some(reader_handle)),
            child: Mutex::new(child),
        };

        client.shared.set_state(ClientState::Initializing);
        match client.initialize_handshake() {
            Ok(()) => {
                client.shared.set_state(ClientState::Ready);
                Ok(client)
            }
            Err(error) => {
                client.shared.fail_and_cancel();
                Err(error)
            }
        }
    }

    fn initialize_handshake(&self) -> Result<(), ClientError> {
        let root_uri = path_to_uri(&self.shared.project_root)?;
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: "root".to_string(),
            }]),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities::default()),
                workspace: Some(WorkspaceClientCapabilities {
                    workspace_folders: Some(true),
                    ..Default::default()
                }),
                window: Some(lsp_types::WindowClientCapabilities {
                    work_done_progress: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let _result: InitializeResult = self.send_request(Operation::Initialize, "initialize", params)?;
        self.send_notification(Operation::Initialize, "initialized", InitializedParams {})?;
        Ok(())
    }

    /// Sends the `shutdown` request and `exit` notification, waits a bounded
    /// grace period for the subprocess to exit, then kills it if necessary.
    /// Every outstanding request is failed with `Cancelled`.
    ///
    /// Idempotent: calling `shutdown` more than once, or on a client that
    /// already failed, is safe.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        if self.shared.state() == ClientState::Closed {
            return Ok(());
        }
        self.shared.set_state(ClientState::ShuttingDown);

        if let Err(error) = self.send_request::<_, Value>(Operation::Shutdown, "shutdown", ()) {
            debug!(target: CLIENT_TARGET, %error, "shutdown request failed; proceeding to exit anyway");
        }
        if let Err(error) = self.send_notification(Operation::Shutdown, "exit", ()) {
            debug!(target: CLIENT_TARGET, %error, "exit notification failed");
        }

        self.shared.pending.cancel_all();

        let mut child = self.child.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut child) = child.take() {
            terminate_child(&mut child);
        }
        drop(child);

        self.shared.set_state(ClientState::Closed);
        Ok(())
    }

    /// Opens `uri` with `text`, registering it in the open-documents set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] if the client is not `Ready`, or
    /// [`ClientError::AlreadyOpen`] if `uri` is already open.
    pub fn open(&self, uri: Uri, text: String, language_id: String) -> Result<(), ClientError> {
        self.shared.require_ready(Operation::Open)?;
        {
            let mut open_documents = self
                .shared
                .open_documents
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !open_documents.insert(uri.clone()) {
                return Err(ClientError::AlreadyOpen { uri: uri.as_str().to_string() });
            }
        }

        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id,
                version: 0,
                text,
            },
        };
        self.send_notification(Operation::Open, "textDocument/didOpen", params)
    }

    /// Closes `uri`, removing it from the open-documents set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] if the client is not `Ready`, or
    /// [`ClientError::NotOpen`] if `uri` was not open.
    pub fn close(&self, uri: Uri) -> Result<(), ClientError> {
        self.shared.require_ready(Operation::Close)?;
        self.ensure_open(&uri)?;
        {
            let mut open_documents = self
                .shared
                .open_documents
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            open_documents.remove(&uri);
        }

        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
        };
        self.send_notification(Operation::Close, "textDocument/didClose", params)
    }

    /// `textDocument/definition`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotOpen`] if `uri` is not open, and otherwise
    /// the standard request errors (`NotReady`, `Timeout`, `Server`).
    pub fn definition(&self, uri: &Uri, position: Position) -> Result<Vec<Location>, ClientError> {
        self.ensure_open(uri)?;
        let params = GotoDefinitionParams {
            text_document_position_params: text_document_position(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<GotoDefinitionResponse> =
            self.send_request_optional(Operation::Definition, "textDocument/definition", params)?;
        Ok(flatten_goto_definition(response))
    }

    /// `textDocument/references`.
    ///
    /// # Errors
    ///
    /// See [`Client::definition`].
    pub fn references(
        &self,
        uri: &Uri,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, ClientError> {
        self.ensure_open(uri)?;
        let params = ReferenceParams {
            text_document_position: text_document_position(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
            context: ReferenceContext { include_declaration },
        };
        let response: Option<Vec<Location>> =
            self.send_request_optional(Operation::References, "textDocument/references", params)?;
        Ok(response.unwrap_or_default())
    }

    /// `textDocument/hover`.
    ///
    /// # Errors
    ///
    /// See [`Client::definition`].
    pub fn hover(&self, uri: &Uri, position: Position) -> Result<Option<Hover>, ClientError> {
        self.ensure_open(uri)?;
        let params = HoverParams {
            text_document_position_params: text_document_position(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        self.send_request_optional(Operation::Hover, "textDocument/hover", params)
    }

    /// `textDocument/documentSymbol`.
    ///
    /// # Errors
    ///
    /// See [`Client::definition`].
    pub fn document_symbol(&self, uri: &Uri) -> Result<Option<DocumentSymbolResponse>, ClientError> {
        self.ensure_open(uri)?;
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        self.send_request_optional(Operation::DocumentSymbol, "textDocument/documentSymbol", params)
    }

    /// `workspace/symbol`.
    ///
    /// # Errors
    ///
    /// Returns the standard request errors (`NotReady`, `Timeout`, `Server`);
    /// unlike the position-based queries this is not scoped to an open
    /// document.
    pub fn workspace_symbol(&self, query: &str) -> Result<Vec<SymbolInformation>, ClientError> {
        self.shared.require_ready(Operation::WorkspaceSymbol)?;
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<Vec<SymbolInformation>> =
            self.send_request_optional(Operation::WorkspaceSymbol, "workspace/symbol", params)?;
        Ok(response.unwrap_or_default())
    }

    /// `textDocument/implementation`.
    ///
    /// # Errors
    ///
    /// See [`Client::definition`].
    pub fn implementation(&self, uri: &Uri, position: Position) -> Result<Vec<Location>, ClientError> {
        self.ensure_open(uri)?;
        let params = GotoDefinitionParams {
            text_document_position_params: text_document_position(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<GotoDefinitionResponse> =
            self.send_request_optional(Operation::Implementation, "textDocument/implementation", params)?;
        Ok(flatten_goto_definition(response))
    }

    /// `textDocument/prepareCallHierarchy`.
    ///
    /// # Errors
    ///
    /// See [`Client::definition`].
    pub fn prepare_call_hierarchy(
        &self,
        uri: &Uri,
        position: Position,
    ) -> Result<Vec<CallHierarchyItem>, ClientError> {
        self.ensure_open(uri)?;
        let params = CallHierarchyPrepareParams {
            text_document_position_params: text_document_position(uri, position),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let response: Option<Vec<CallHierarchyItem>> = self.send_request_optional(
            Operation::PrepareCallHierarchy,
            "textDocument/prepareCallHierarchy",
            params,
        )?;
        Ok(response.unwrap_or_default())
    }

    /// `callHierarchy/incomingCalls`.
    ///
    /// # Errors
    ///
    /// Returns the standard request errors (`NotReady`, `Timeout`, `Server`).
    pub fn incoming_calls(
        &self,
        item: CallHierarchyItem,
    ) -> Result<Vec<CallHierarchyIncomingCall>, ClientError> {
        self.shared.require_ready(Operation::IncomingCalls)?;
        let params = CallHierarchyIncomingCallsParams {
            item,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<Vec<CallHierarchyIncomingCall>> =
            self.send_request_optional(Operation::IncomingCalls, "callHierarchy/incomingCalls", params)?;
        Ok(response.unwrap_or_default())
    }

    /// `callHierarchy/outgoingCalls`.
    ///
    /// # Errors
    ///
    /// Returns the standard request errors (`NotReady`, `Timeout`, `Server`).
    pub fn outgoing_calls(
        &self,
        item: CallHierarchyItem,
    ) -> Result<Vec<CallHierarchyOutgoingCall>, ClientError> {
        self.shared.require_ready(Operation::OutgoingCalls)?;
        let params = CallHierarchyOutgoingCallsParams {
            item,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: Default::default(),
        };
        let response: Option<Vec<CallHierarchyOutgoingCall>> =
            self.send_request_optional(Operation::OutgoingCalls, "callHierarchy/outgoingCalls", params)?;
        Ok(response.unwrap_or_default())
    }

    /// Blocks until `uri` has received at least one diagnostics batch, or
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotReady`] if the client is not `Ready`.
    pub fn wait_for_file(&self, uri: &Uri, timeout: Duration) -> Result<bool, ClientError> {
        self.shared.require_ready(Operation::WaitForFile)?;
        Ok(self.shared.readiness.wait_for_file(uri, timeout))
    }

    /// Returns whether `uri` has already received at least one diagnostics
    /// batch, without blocking.
    #[must_use]
    pub fn is_file_ready(&self, uri: &Uri) -> bool {
        self.shared.readiness.is_ready(uri)
    }

    /// Returns the current indexing-status rollup.
    #[must_use]
    pub fn indexing_status(&self) -> IndexingStatus {
        self.shared.readiness.indexing_status()
    }

    /// Returns whether `uri` is currently open.
    #[must_use]
    pub fn is_open(&self, uri: &Uri) -> bool {
        self.shared
            .open_documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(uri)
    }

    /// Returns the number of currently open documents.
    #[must_use]
    pub fn open_files_count(&self) -> usize {
        self.shared
            .open_documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns the project root this client is bound to.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.shared.project_root
    }

    /// Returns whether the client is in the `Ready` state.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state() == ClientState::Ready
    }

    fn ensure_open(&self, uri: &Uri) -> Result<(), ClientError> {
        self.shared.require_ready(Operation::Definition)?;
        let open_documents = self
            .shared
            .open_documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if open_documents.contains(uri) {
            Ok(())
        } else {
            Err(ClientError::NotOpen { uri: uri.as_str().to_string() })
        }
    }

    /// Allocates an id, registers a pending slot, and writes the request
    /// frame, all under the writer lock, so ids land on the wire in
    /// allocation order and the slot always exists before the write
    /// completes.
    fn send_request_raw(
        &self,
        operation: Operation,
        method: &str,
        params: impl Serialize,
    ) -> Result<pending::PendingSlot, ClientError> {
        let payload = serde_json::to_value(params).map_err(|error| ClientError::Protocol {
            operation,
            detail: error.to_string(),
        })?;

        let mut writer = self.shared.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = writer.next_id;
        writer.next_id += 1;
        let slot = self.shared.pending.insert(id);

        let request = JsonRpcRequest::new(id, method, Some(payload));
        let bytes = serde_json::to_vec(&request).map_err(|error| ClientError::Protocol {
            operation,
            detail: error.to_string(),
        })?;
        write_message(&mut writer.sink, &bytes)?;
        drop(writer);

        Ok(slot)
    }

    fn send_request<P: Serialize, R: DeserializeOwned>(
        &self,
        operation: Operation,
        method: &str,
        params: P,
    ) -> Result<R, ClientError> {
        let result = self
            .send_request_optional::<P, R>(operation, method, params)?
            .ok_or_else(|| ClientError::Protocol {
                operation,
                detail: "response had no result".to_string(),
            })?;
        Ok(result)
    }

    fn send_request_optional<P: Serialize, R: DeserializeOwned>(
        &self,
        operation: Operation,
        method: &str,
        params: P,
    ) -> Result<Option<R>, ClientError> {
        let slot = self.send_request_raw(operation, method, params)?;
        let timeout = self.shared.request_timeout;
        match slot.recv_timeout(timeout) {
            Some(Ok(Value::Null)) => Ok(None),
            Some(Ok(value)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|error| ClientError::Protocol { operation, detail: error.to_string() }),
            Some(Err(PendingFailure::Server(error))) => Err(ClientError::from_jsonrpc(operation, error)),
            Some(Err(PendingFailure::Cancelled)) => Err(ClientError::Cancelled { operation }),
            None => {
                self.shared.pending.remove(slot.id());
                Err(ClientError::Timeout {
                    operation,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    fn send_notification(&self, operation: Operation, method: &str, params: impl Serialize) -> Result<(), ClientError> {
        let payload = serde_json::to_value(params).map_err(|error| ClientError::Protocol {
            operation,
            detail: error.to_string(),
        })?;
        let notification = crate::jsonrpc::JsonRpcNotification::new(method, Some(payload));
        let bytes = serde_json::to_vec(&notification).map_err(|error| ClientError::Protocol {
            operation,
            detail: error.to_string(),
        })?;

        let mut writer = self.shared.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        write_message(&mut writer.sink, &bytes)?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut child) = child.take() {
            if let Err(error) = child.kill() {
                warn!(target: CLIENT_TARGET, %error, "failed to kill language server process on drop");
            } else {
                let _ignored = child.wait();
            }
        }
        drop(child);

        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            drop(handle);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("project_root", &self.shared.project_root)
            .field("state", &self.shared.state().label())
            .field("open_files", &self.open_files_count())
            .finish()
    }
}

fn text_document_position(uri: &Uri, position: Position) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position,
    }
}

fn flatten_goto_definition(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}

fn path_to_uri(path: &Path) -> Result<Uri, ClientError> {
    let text = format!("file://{}", path.display());
    text.parse().map_err(|_error| ClientError::Protocol {
        operation: Operation::Initialize,
        detail: format!("project root does not form a valid URI: {text}"),
    })
}

/// Spawns the configured server, distinguishing a missing executable from
/// other spawn failures.
fn spawn_process(
    config: &ClientConfig,
) -> Result<(Child, BufReader<std::process::ChildStdout>, BufWriter<std::process::ChildStdin>), ClientError> {
    debug!(
        target: CLIENT_TARGET,
        command = %config.command.display(),
        args = ?config.args,
        "spawning language server process"
    );

    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .current_dir(&config.project_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = command.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ClientError::Spawn {
                command: config.command.display().to_string(),
                detail: "executable not found on PATH".to_string(),
                source: Some(source),
            }
        } else {
            ClientError::Spawn {
                command: config.command.display().to_string(),
                detail: "failed to start process".to_string(),
                source: Some(source),
            }
        }
    })?;

    let stdin = child.stdin.take().ok_or_else(|| ClientError::Spawn {
        command: config.command.display().to_string(),
        detail: "failed to capture stdin".to_string(),
        source: None,
    })?;
    let stdout = child.stdout.take().ok_or_else(|| ClientError::Spawn {
        command: config.command.display().to_string(),
        detail: "failed to capture stdout".to_string(),
        source: None,
    })?;

    debug!(target: CLIENT_TARGET, pid = child.id(), "language server process spawned");

    Ok((child, BufReader::new(stdout), BufWriter::new(stdin)))
}

/// Waits for `child` to exit on its own for a bounded grace period before
/// killing it.
fn terminate_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_status)) => {}
        Ok(None) => {
            thread::sleep(Duration::from_millis(200));
            if matches!(child.try_wait(), Ok(None) | Err(_)) {
                let _ignored = child.kill();
                let _ignored = child.wait();
            }
        }
        Err(_error) => {
            let _ignored = child.kill();
            let _ignored = child.wait();
        }
    }
}
