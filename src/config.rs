//! Client configuration.
//!
//! Loading these values from CLI flags, an INI file, or the environment is a
//! concern for whatever binary embeds this crate; [`ClientConfig`] only
//! carries the resolved values.

use std::path::PathBuf;
use std::time::Duration;

/// Default request timeout applied when [`ClientConfig`] does not override
/// it.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for spawning and talking to the language server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The server executable, resolved against `PATH` if not absolute.
    pub command: PathBuf,
    /// Extra arguments passed to the server.
    pub args: Vec<String>,
    /// Project root handed to the server at `initialize` and used by the
    /// manager to key its singleton.
    pub project_root: PathBuf,
    /// How long a request may remain outstanding before it fails with
    /// [`crate::error::ClientError::Timeout`].
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Builds a configuration pointing at the default `clangd` binary for
    /// the given project root, with the default request timeout.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            command: PathBuf::from("clangd"),
            args: Vec::new(),
            project_root: project_root.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Overrides the server executable.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.command = command.into();
        self
    }

    /// Overrides the server arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_to_clangd_on_path() {
        let config = ClientConfig::new("/workspace");
        assert_eq!(config.command, PathBuf::from("clangd"));
        assert_eq!(config.request_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[rstest]
    fn builder_overrides_apply() {
        let config = ClientConfig::new("/workspace")
            .with_command("/opt/llvm/bin/clangd")
            .with_args(vec!["--log=verbose".to_string()])
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.command, PathBuf::from("/opt/llvm/bin/clangd"));
        assert_eq!(config.args, vec!["--log=verbose".to_string()]);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
