//! Process-wide singleton holding at most one [`Client`], bound to one
//! project root.
//!
//! A single warm `clangd` process is shared by every tool call in an agent
//! session; the manager is the one place that decides whether a fresh
//! [`Client::start`] is needed or an existing one can be reused.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Process-wide manager state.
struct ManagerState {
    client: Option<Arc<Client>>,
}

/// Owns at most one live [`Client`].
///
/// `get` is the single initialisation gate: concurrent callers racing to
/// start the client for the same root all observe the same resulting
/// [`Client`] (or the same initialisation error); a call naming a different
/// root than the live client's fails with [`ClientError::ProjectMismatch`]
/// until [`Manager::reset`] is called.
pub struct Manager {
    state: Mutex<ManagerState>,
}

impl Manager {
    /// Returns the process-wide manager instance.
    #[must_use]
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<Manager> = OnceLock::new();
        INSTANCE.get_or_init(|| Manager {
            state: Mutex::new(ManagerState { client: None }),
        })
    }

    /// Returns the live client bound to `project_root`, starting one if none
    /// exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ProjectMismatch`] if a client is already bound
    /// to a different root. Returns the client's own start-up errors
    /// (`Spawn`, `Timeout`, `Server`, ...) if starting a new client fails;
    /// on failure no client is retained, so a later call may retry.
    pub fn get(&self, config: &ClientConfig) -> Result<Arc<Client>, ClientError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(client) = &state.client {
            let bound = canonical_root(client.project_root());
            let requested = canonical_root(&config.project_root);
            return if paths_match(&bound, &requested) {
                Ok(Arc::clone(client))
            } else {
                Err(ClientError::ProjectMismatch {
                    bound: client.project_root().display().to_string(),
                    requested: config.project_root.display().to_string(),
                })
            };
        }

        let client = Arc::new(Client::start(config)?);
        state.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Shuts down and drops the live client, if any. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates [`Client::shutdown`]'s error, if the live client's graceful
    /// shutdown sequence fails. The client is cleared from the manager
    /// regardless of the outcome.
    pub fn reset(&self) -> Result<(), ClientError> {
        let client = {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.client.take()
        };

        match client {
            Some(client) => client.shutdown(),
            None => Ok(()),
        }
    }

    /// Returns whether a client is currently live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.client.as_ref().is_some_and(|client| client.is_ready())
    }

    /// Returns the number of open documents in the live client, or `0` if
    /// none is running.
    #[must_use]
    pub fn open_files_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.client.as_ref().map_or(0, |client| client.open_files_count())
    }

    /// Returns the live client's indexing status string (`"idle"`,
    /// `"indexing"`, `"indexing (NN%)"`), or `"idle"` if none is running.
    #[must_use]
    pub fn indexing_status(&self) -> String {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .client
            .as_ref()
            .map_or_else(|| "idle".to_string(), |client| client.indexing_status().as_status_string())
    }

    /// Returns whether the live client is currently indexing.
    #[must_use]
    pub fn is_indexing(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .client
            .as_ref()
            .is_some_and(|client| client.indexing_status().in_progress)
    }
}

fn paths_match(bound: &Path, requested: &Path) -> bool {
    bound == requested
}

/// Convenience wrapper around [`Manager::global`] for callers that only need
/// the root's canonical form.
#[must_use]
pub fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_error| root.to_path_buf())
}
