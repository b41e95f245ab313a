// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server assembly: socket, signal mask, pool, per-worker contexts, the
//! listener thread, and the orderly drain + teardown after it exits.

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info};

use crate::listener::{self, Listener, ListenerError};
use crate::pool::{SpawnError, ThreadPool};
use crate::queue::SyncQueue;
use crate::secure::{ConnectionContext, SecureError, SecureOptions};
use crate::shutdown::{self, ShutdownFlag};

/// Resolved server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    /// TCP port bound on all interfaces.
    pub port: u16,
    /// Directory served to clients.
    pub serve_root: PathBuf,
    /// Plaintext or TLS operation.
    pub secure: SecureOptions,
    /// Worker threads; `None` sizes the pool as active cores plus one.
    pub worker_count: Option<usize>,
}

/// Startup failures; each maps to a non-zero process exit.
#[derive(Debug)]
pub enum ServerError {
    /// Socket setup or poller setup failed.
    Listener(ListenerError),
    /// TLS material could not be used.
    Secure(SecureError),
    /// Worker threads could not be created.
    Pool(SpawnError),
    /// The SIGINT descriptor could not be opened.
    Signal(nix::errno::Errno),
    /// The listener thread could not be spawned.
    ListenerThread(std::io::Error),
}

impl Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener(err) => write!(f, "{err}"),
            Self::Secure(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "{err}"),
            Self::Signal(errno) => write!(f, "could not open signal descriptor: {errno}"),
            Self::ListenerThread(err) => write!(f, "could not spawn listener thread: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ListenerError> for ServerError {
    fn from(err: ListenerError) -> Self {
        Self::Listener(err)
    }
}

/// Runs the server until SIGINT. See [`run_with_flag`] for the lifecycle.
pub fn run(config: ServerConfig) -> Result<(), ServerError> {
    run_with_flag(config, ShutdownFlag::new())
}

/// Runs the server until SIGINT arrives or `shutdown` is requested (the
/// latter is how embedders and tests stop it without a signal).
///
/// Lifecycle: bind the socket, block SIGINT and open its descriptor before
/// any other thread exists, bring up the pool and one transport context per
/// worker, run the listener on its own thread, and after it leaves wait on
/// every outstanding connection job before tearing the pool down.
pub fn run_with_flag(config: ServerConfig, shutdown: ShutdownFlag) -> Result<(), ServerError> {
    let socket = listener::bind_listener(config.port)?;

    // Before any thread is spawned, so every thread inherits the blocked
    // mask and only the polled descriptor ever observes SIGINT.
    let signal_fd = shutdown::sigint_fd().map_err(ServerError::Signal)?;

    let pool = match config.worker_count {
        Some(count) => ThreadPool::new(count),
        None => ThreadPool::new_dynamic(),
    }
    .map_err(ServerError::Pool)?;

    info!(
        "serving ftp://0.0.0.0:{} with {} workers",
        config.port,
        pool.worker_count()
    );

    let mut contexts = Vec::with_capacity(pool.worker_count());
    for _ in 0..pool.worker_count() {
        contexts.push(Mutex::new(
            ConnectionContext::new(&config.secure).map_err(ServerError::Secure)?,
        ));
    }
    let contexts = Arc::new(contexts);

    let handles = SyncQueue::new();
    let listener = Listener::new(
        socket,
        &pool,
        &handles,
        contexts,
        config.serve_root.clone(),
        shutdown,
    );

    let joined = thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name(String::from("listener thread"))
            .spawn_scoped(scope, move || listener.run(signal_fd));
        match spawned {
            Ok(listener_thread) => Ok(listener_thread.join()),
            Err(err) => Err(ServerError::ListenerThread(err)),
        }
    })?;

    match joined {
        Ok(Ok(())) => info!("listener thread exited cleanly"),
        Ok(Err(err)) => error!("listener thread failed: {err}"),
        Err(_) => error!("listener thread panicked"),
    }

    // The listener does not wait on its submissions when leaving; settle
    // every in-flight connection before the pool goes away.
    while !handles.is_empty() {
        listener::log_job_outcome(handles.pop().wait());
    }

    pool.shutdown();
    Ok(())
}
