//! Polling watcher for the persisted policy file.
//!
//! The watcher polls the file's modification time on a fixed interval and
//! recompiles on change. A successful compile invokes the update callback;
//! a failing compile invokes the error callback once per failing mtime, so
//! a file stuck in a bad state does not spam diagnostics while a partial
//! write (same failure, new mtime) is retried.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::{Compilation, PolicyCompiler, SyntaxError};

/// Cancellation handle for a running [`PolicyWatcher`].
#[derive(Debug)]
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop the watch loop and wait for the thread to exit.
    pub fn cancel(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Watches a policy file and recompiles it on change.
pub struct PolicyWatcher {
    path: PathBuf,
    interval: Duration,
    compiler: Arc<dyn PolicyCompiler>,
}

impl PolicyWatcher {
    /// Create a watcher for `path` polling at `interval`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, interval: Duration, compiler: Arc<dyn PolicyCompiler>) -> Self {
        Self { path: path.into(), interval, compiler }
    }

    /// Start the watch loop on a background thread.
    ///
    /// `on_update` receives each successful compilation along with the
    /// source text it came from; `on_error` receives structured
    /// diagnostics for failing revisions.
    pub fn spawn<U, E>(self, on_update: U, on_error: E) -> WatchHandle
    where
        U: Fn(Compilation, String) + Send + 'static,
        E: Fn(SyntaxError) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("policy-watch".to_string())
            .spawn(move || {
                let mut last_ok: Option<SystemTime> = None;
                let mut last_err: Option<SystemTime> = None;
                while !stop_flag.load(Ordering::Relaxed) {
                    self.tick(&mut last_ok, &mut last_err, &on_update, &on_error);
                    std::thread::sleep(self.interval);
                }
            })
            .unwrap_or_else(|e| {
                // Thread spawn only fails on resource exhaustion; surface
                // it as an unstarted watcher rather than a panic path.
                tracing::warn!(error = %e, "failed to spawn policy watch thread");
                std::thread::spawn(|| {})
            });
        WatchHandle { stop, thread: Some(thread) }
    }

    fn tick<U, E>(
        &self,
        last_ok: &mut Option<SystemTime>,
        last_err: &mut Option<SystemTime>,
        on_update: &U,
        on_error: &E,
    ) where
        U: Fn(Compilation, String),
        E: Fn(SyntaxError),
    {
        let label = self.path.display().to_string();
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        let Ok(mtime) = meta.modified() else {
            return;
        };
        if *last_ok == Some(mtime) {
            return;
        }
        let source = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) => {
                if *last_err != Some(mtime) {
                    *last_err = Some(mtime);
                    on_error(SyntaxError::io(&label, e.to_string()));
                }
                return;
            }
        };
        match self.compiler.compile(&source, &label) {
            Ok(compilation) => {
                *last_ok = Some(mtime);
                *last_err = None;
                tracing::debug!(path = %label, statements = compilation.statement_count, "policy file recompiled");
                on_update(compilation, source);
            }
            Err(err) => {
                if *last_err != Some(mtime) {
                    *last_err = Some(mtime);
                    tracing::warn!(path = %label, line = err.line, "policy file failed to compile");
                    on_error(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::compiler::StatementCompiler;

    #[test]
    fn test_watcher_reports_update_then_error_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.txt");
        std::fs::write(
            &path,
            "permit (principal, action == Action::\"NetworkConnect\", resource)\nwhen { resource in [ Host::\"*\" ] };",
        )
        .unwrap();

        let (update_tx, update_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        let watcher = PolicyWatcher::new(
            &path,
            Duration::from_millis(10),
            Arc::new(StatementCompiler::new()),
        );
        let handle = watcher.spawn(
            move |compilation, _source| {
                let _ = update_tx.send(compilation.rules.connect_default_allow);
            },
            move |err| {
                let _ = error_tx.send(err.code);
            },
        );

        let allowed = update_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(allowed);

        // coarse-mtime filesystems need the revisions to be distinguishable
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(&path, "nonsense").unwrap();
        let code = error_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, crate::compiler::CODE_PARSE);

        handle.cancel();
    }
}
