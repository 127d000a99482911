//! Engine thread handle.
//!
//! The engine is `!Send`, so it lives on a dedicated thread. `EngineHandle`
//! is the `Send + Sync` side: it marshals closures onto that thread and runs
//! them one at a time, in submission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::ScriptEngine;
use crate::error::{BridgeResult, HandleError};
use crate::registry::CloseReport;

type Job = Box<dyn FnOnce(&ScriptEngine) + Send>;

enum Command {
    Run(Job),
    Shutdown(oneshot::Sender<Result<CloseReport, HandleError>>),
}

/// Handle to an engine running on its own thread
pub struct EngineHandle {
    name: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    terminated: Arc<AtomicBool>,
    thread_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EngineHandle {
    /// Start an engine thread. `setup` runs on that thread before any
    /// submitted closure; its failure fails the spawn.
    pub fn spawn<S>(name: impl Into<String>, config: EngineConfig, setup: S) -> Result<Self, HandleError>
    where
        S: FnOnce(&ScriptEngine) -> BridgeResult<()> + Send + 'static,
    {
        let name = name.into();
        let terminated = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);

        let thread_name = name.clone();
        let thread_terminated = terminated.clone();
        let thread_handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(target: "duplex.handle", engine = %thread_name, "thread started");
            let engine = match ScriptEngine::new(config).and_then(|engine| {
                setup(&engine)?;
                Ok(engine)
            }) {
                Ok(engine) => engine,
                Err(e) => {
                    thread_terminated.store(true, Ordering::SeqCst);
                    let _ = init_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            run(&engine, cmd_rx);
            thread_terminated.store(true, Ordering::SeqCst);
            debug!(target: "duplex.handle", engine = %thread_name, "thread exiting");
        })?;

        let started = init_rx.recv().map_err(|_| HandleError::ChannelClosed);
        match started {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = thread_handle.join();
                return Err(HandleError::Startup(message));
            }
            Err(e) => {
                let _ = thread_handle.join();
                return Err(e);
            }
        }

        debug!(target: "duplex.handle", engine = %name, "engine ready");
        Ok(Self {
            name,
            cmd_tx,
            terminated,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn submit(&self, command: Command) -> Result<(), HandleError> {
        if self.is_terminated() {
            return Err(HandleError::Terminated);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| HandleError::ChannelClosed)
    }

    /// Run `f` on the engine thread and wait for its result
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(&ScriptEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Command::Run(Box::new(move |engine| {
            let _ = reply_tx.send(f(engine));
        })))?;
        reply_rx.await.map_err(|_| HandleError::ChannelClosed)
    }

    /// Blocking variant of `invoke`. Must not be called from inside an async
    /// runtime.
    pub fn invoke_blocking<F, R>(&self, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(&ScriptEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Command::Run(Box::new(move |engine| {
            let _ = reply_tx.send(f(engine));
        })))?;
        reply_rx.blocking_recv().map_err(|_| HandleError::ChannelClosed)
    }

    /// Queue `f` without waiting for it
    pub fn post<F>(&self, f: F) -> Result<(), HandleError>
    where
        F: FnOnce(&ScriptEngine) + Send + 'static,
    {
        self.submit(Command::Run(Box::new(f)))
    }

    /// Close the engine on its thread and wait for the thread to finish
    pub fn shutdown(&self) -> Result<CloseReport, HandleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Command::Shutdown(reply_tx))?;
        let report = reply_rx.blocking_recv().map_err(|_| HandleError::ChannelClosed)?;
        self.join()?;
        report
    }

    fn join(&self) -> Result<(), HandleError> {
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| HandleError::ThreadPanic)?;
        }
        Ok(())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if !self.is_terminated() {
            let (reply_tx, _) = oneshot::channel();
            let _ = self.cmd_tx.send(Command::Shutdown(reply_tx));
        }
        if let Err(e) = self.join() {
            warn!(target: "duplex.handle", engine = %self.name, error = %e, "engine thread failed");
        }
    }
}

fn run(engine: &ScriptEngine, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = cmd_rx.blocking_recv() {
        match command {
            Command::Run(job) => job(engine),
            Command::Shutdown(reply) => {
                let report = engine
                    .close()
                    .map_err(|e| HandleError::Close(e.to_string()));
                let _ = reply.send(report);
                return;
            }
        }
    }
}
