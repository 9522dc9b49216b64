//! Event loop lifecycle.
//!
//! The loop owns the asynchronous I/O reactor and exactly one dedicated
//! worker thread driving it. A keep-alive token held by the `EventLoop`
//! keeps the reactor running while it is otherwise idle; releasing the
//! token lets the worker exit. All connection completions fire on the
//! worker thread.

use std::future::Future;
use std::io;
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{NetError, NetResult};

/// Name of the reactor worker thread.
const LOOP_THREAD_NAME: &str = "net-loop";

/// The asynchronous I/O reactor and its dedicated worker thread.
pub struct EventLoop {
    /// Handle for spawning work onto the reactor.
    handle: Handle,
    /// Keep-alive token; the run loop exits once this is dropped.
    keep_alive: Option<mpsc::Sender<()>>,
    /// The worker thread driving the reactor.
    worker: Option<thread::JoinHandle<()>>,
}

impl EventLoop {
    /// Start the reactor on a dedicated worker thread.
    ///
    /// Thread-spawn or reactor-build failure is fatal and reported
    /// synchronously. Per-socket errors later on never are; they only
    /// fail the affected connection.
    pub fn start() -> NetResult<Self> {
        let (keep_alive, mut release_rx) = mpsc::channel::<()>(1);
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();

        let worker = thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));

                // Runs until the keep-alive token is released. Tasks
                // still pending at that point are cancelled when the
                // runtime drops.
                runtime.block_on(async move {
                    let _ = release_rx.recv().await;
                });
                tracing::debug!("event loop stopped");
            })
            .map_err(NetError::Init)?;

        let handle = match handle_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(NetError::Init(e));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(NetError::Init(io::Error::new(
                    io::ErrorKind::Other,
                    "worker exited before reporting a reactor handle",
                )));
            }
        };

        tracing::debug!(thread = LOOP_THREAD_NAME, "event loop started");

        Ok(Self {
            handle,
            keep_alive: Some(keep_alive),
            worker: Some(worker),
        })
    }

    /// Handle for spawning work onto the loop thread.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a future onto the loop thread.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.keep_alive.is_some()
    }

    /// Release the keep-alive token and join the worker thread.
    ///
    /// Blocks until the worker has exited. A second call is a no-op.
    pub fn shutdown(&mut self) {
        if let Some(keep_alive) = self.keep_alive.take() {
            drop(keep_alive);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("event loop worker panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
