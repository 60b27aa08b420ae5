//! Assembles the transport bootstrap and `EagerConnection` for eager opens,
//! and constructs a `LazyConnection` holding a handle back to the factory
//! for lazy opens. The one place that resolves a relative filename against
//! the current working directory at call time, so the stored path is stable
//! even if the process later changes directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bootstrap::{self, Transport};
use crate::connection::EagerConnection;
use crate::error::Result;
use crate::lazy::LazyConnection;
use crate::options::ConnectOptions;

/// The seam `LazyConnection` opens eager connections through. `Factory` is
/// the only production implementation; tests substitute a mock that opens
/// an in-process connection instead of spawning a real worker, so the idle
/// timer / soft-close / reopen state machine in `lazy.rs` can be exercised
/// without a compiled worker binary.
#[async_trait]
pub(crate) trait ConnectionOpener: Send + Sync {
    async fn open_connection(&self, filename: &str, options: ConnectOptions) -> Result<EagerConnection>;
}

#[async_trait]
impl ConnectionOpener for Factory {
    async fn open_connection(&self, filename: &str, options: ConnectOptions) -> Result<EagerConnection> {
        self.open(filename, options).await
    }
}

/// Cheap to clone (`Arc`-backed) so a `LazyConnection` can hold one without
/// keeping anything else alive artificially.
#[derive(Clone, Default)]
pub struct Factory {
    _inner: Arc<()>,
}

impl Factory {
    pub fn new() -> Self {
        Factory::default()
    }

    /// Spawns a worker, establishes its transport, and issues `open`.
    /// Failure tears down the transport and surfaces the worker's error
    /// unchanged.
    pub async fn open(&self, filename: &str, options: ConnectOptions) -> Result<EagerConnection> {
        let filename = resolve_filename(filename);
        let Transport { read, write, child } = bootstrap::spawn(&options).await?;
        let connection = EagerConnection::new(read, write, Some(child));

        match connection.open_handle(&filename, options.flags.bits()).await {
            Ok(()) => Ok(connection),
            Err(err) => {
                connection.close();
                Err(err)
            }
        }
    }

    /// Constructs a connection that defers the underlying open until first
    /// use; never fails synchronously since nothing happens yet.
    pub fn open_lazy(&self, filename: &str, options: ConnectOptions) -> LazyConnection {
        LazyConnection::new(Arc::new(self.clone()), resolve_filename(filename), options)
    }
}

/// `:memory:` and the empty string pass through verbatim; any other relative
/// path is resolved against the current directory right now.
fn resolve_filename(filename: &str) -> String {
    if filename.is_empty() || filename == ":memory:" {
        return filename.to_string();
    }
    let path = Path::new(filename);
    if path.is_absolute() {
        return filename.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path).to_string_lossy().into_owned(),
        Err(_) => filename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_and_empty_filenames_pass_through() {
        assert_eq!(resolve_filename(":memory:"), ":memory:");
        assert_eq!(resolve_filename(""), "");
    }

    #[test]
    fn relative_path_is_resolved_against_cwd_now() {
        let resolved = resolve_filename("foo.db");
        assert!(Path::new(&resolved).is_absolute());
        assert!(resolved.ends_with("foo.db"));
    }

    #[test]
    fn absolute_path_is_untouched() {
        assert_eq!(resolve_filename("/tmp/foo.db"), "/tmp/foo.db");
    }
}
