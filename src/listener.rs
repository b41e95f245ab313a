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

//! The main listener implementation

use std::fmt::{self, Display};
use std::io::{self, ErrorKind};
use std::net::TcpListener as StdTcpListener;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, trace, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::sys::signalfd::SignalFd;
use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
};

use crate::ftp::handler::{self, ConnectionArgument, FtpState, JobOutcome};
use crate::pool::{JobHandle, ThreadPool, WaitError};
use crate::queue::SyncQueue;
use crate::secure::ConnectionContext;
use crate::shutdown::ShutdownFlag;

const ACCEPT_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);

/// Pending unaccepted connections the kernel may hold.
const SOCKET_BACKLOG: i32 = 10;

/// Liveness tick; the loop is otherwise event-driven.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-pressure watermark: once more than this many connection jobs are in
/// flight, the listener synchronously drains handles until half remain.
pub const MAX_QUEUE_SIZE: usize = 100;

/// Failures that bring the listener (and therefore startup) down. Individual
/// accept failures are not among them; those are logged and served past.
#[derive(Debug)]
pub enum ListenerError {
    /// Creating or configuring the listening socket failed.
    Socket(nix::errno::Errno),
    /// The poller could not be created or a descriptor not registered.
    Poll(io::Error),
}

impl Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(errno) => write!(f, "could not set up listening socket: {errno}"),
            Self::Poll(err) => write!(f, "could not poll listening socket: {err}"),
        }
    }
}

impl std::error::Error for ListenerError {}

impl From<nix::errno::Errno> for ListenerError {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::Socket(errno)
    }
}

/// Creates the TCP/IPv4 listening socket: `SO_REUSEPORT`, bound to all
/// interfaces on `port`, listening with a fixed backlog, non-blocking so the
/// accept loop can drain until `WouldBlock`.
pub fn bind_listener(port: u16) -> Result<StdTcpListener, ListenerError> {
    let fd = socket::socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        SockProtocol::Tcp,
    )?;
    socket::setsockopt(&fd, sockopt::ReusePort, &true)?;

    let addr = SockaddrIn::new(0, 0, 0, 0, port);
    socket::bind(fd.as_raw_fd(), &addr)?;
    socket::listen(&fd, Backlog::new(SOCKET_BACKLOG)?)?;

    let listener = StdTcpListener::from(fd);
    listener
        .set_nonblocking(true)
        .map_err(ListenerError::Poll)?;
    Ok(listener)
}

/// `Listener` owns the accept loop: it multiplexes the listening socket and
/// the SIGINT descriptor, submits one connection job per accepted socket and
/// throttles itself when workers fall behind.
#[derive(Debug)]
pub struct Listener<'pool> {
    listener: StdTcpListener,
    pool: &'pool ThreadPool<JobOutcome>,
    // handles of submitted-but-not-awaited connection jobs; drained here past
    // the watermark and by the server after the listener exits
    handles: &'pool SyncQueue<JobHandle<JobOutcome>>,
    contexts: Arc<Vec<Mutex<ConnectionContext>>>,
    serve_root: PathBuf,
    shutdown: ShutdownFlag,
}

impl<'pool> Listener<'pool> {
    /// Bundles the listener state. `bind_listener` provides the socket.
    pub fn new(
        listener: StdTcpListener,
        pool: &'pool ThreadPool<JobOutcome>,
        handles: &'pool SyncQueue<JobHandle<JobOutcome>>,
        contexts: Arc<Vec<Mutex<ConnectionContext>>>,
        serve_root: PathBuf,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            listener,
            pool,
            handles,
            contexts,
            serve_root,
            shutdown,
        }
    }

    /// Main accept loop. Returns when SIGINT fires on `signal_fd` or the
    /// shutdown flag is set; the caller then drains outstanding handles and
    /// tears the pool down.
    pub fn run(mut self, mut signal_fd: SignalFd) -> Result<(), ListenerError> {
        let mut poll = Poll::new().map_err(ListenerError::Poll)?;
        poll.registry()
            .register(
                &mut SourceFd(&self.listener.as_raw_fd()),
                ACCEPT_TOKEN,
                Interest::READABLE,
            )
            .map_err(ListenerError::Poll)?;
        poll.registry()
            .register(
                &mut SourceFd(&signal_fd.as_raw_fd()),
                SIGNAL_TOKEN,
                Interest::READABLE,
            )
            .map_err(ListenerError::Poll)?;

        let mut events = Events::with_capacity(8);
        loop {
            if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() != ErrorKind::Interrupted {
                    error!("poll failed: {err}");
                }
                continue;
            }

            let mut accept_ready = false;
            let mut signal_ready = false;
            for event in events.iter() {
                match event.token() {
                    ACCEPT_TOKEN => accept_ready = true,
                    SIGNAL_TOKEN => signal_ready = true,
                    _ => {}
                }
            }

            if signal_ready || self.shutdown.is_requested() {
                if signal_ready {
                    let _ = signal_fd.read_signal();
                }
                self.shutdown.request();
                info!("shutdown requested, listener leaving");
                return Ok(());
            }

            if accept_ready {
                self.accept_ready();
            }
            // plain timeout: loop for the next tick
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    trace!("accepted connection from {peer}");
                    // Workers do blocking I/O on the accepted socket.
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!("could not configure accepted socket: {err}");
                        continue;
                    }

                    let argument = ConnectionArgument {
                        contexts: Arc::clone(&self.contexts),
                        stream,
                        state: FtpState::new(self.serve_root.clone()),
                    };
                    let handle = self
                        .pool
                        .submit(move |info| handler::handle_connection(argument, info));
                    self.handles.push(handle);

                    self.drain_past_watermark();
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) => {
                    // One refused client must not bring the server down.
                    warn!("accept failed: {err}");
                    return;
                }
            }
        }
    }

    // Waiting here can block the listener, but the handles at the head are
    // the oldest jobs and usually long finished; without the drain the handle
    // queue would grow without bound.
    fn drain_past_watermark(&self) {
        let mut size = self.handles.len();
        if size <= MAX_QUEUE_SIZE {
            return;
        }

        let boundary = size / 2;
        while size > boundary {
            log_job_outcome(self.handles.pop().wait());
            size -= 1;
        }
    }
}

/// Translates an awaited connection-job result into log lines.
pub fn log_job_outcome(result: Result<JobOutcome, WaitError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("a connection handler failed: {err}"),
        Err(err) => error!("a connection handler vanished: {err}"),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::{bind_listener, Listener, MAX_QUEUE_SIZE};
    use crate::pool::ThreadPool;
    use crate::queue::SyncQueue;
    use crate::shutdown::ShutdownFlag;

    #[test]
    fn bound_socket_listens_on_an_ephemeral_port() {
        let listener = bind_listener(0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_ne!(0, addr.port());
    }

    #[test]
    fn drain_halves_the_handle_queue_past_the_watermark() {
        let socket = bind_listener(0).unwrap();
        let pool = ThreadPool::new(2).unwrap();
        let handles = SyncQueue::new();
        let listener = Listener::new(
            socket,
            &pool,
            &handles,
            Arc::new(Vec::new()),
            PathBuf::from("."),
            ShutdownFlag::new(),
        );

        for _ in 0..MAX_QUEUE_SIZE {
            handles.push(pool.submit(|_| Ok(())));
        }
        listener.drain_past_watermark();
        assert_eq!(MAX_QUEUE_SIZE, handles.len());

        handles.push(pool.submit(|_| Ok(())));
        listener.drain_past_watermark();
        assert_eq!((MAX_QUEUE_SIZE + 1) / 2, handles.len());

        while !handles.is_empty() {
            assert_eq!(Ok(Ok(())), handles.pop().wait());
        }

        drop(listener);
        pool.shutdown();
    }
}
