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

//! Plaintext-or-TLS connection transport.
//!
//! Three layers, longest-lived first: [`SecureOptions`] is built once per
//! server and owns the TLS configuration; [`ConnectionContext`] is built once
//! per worker and keeps a ready-to-use server session between connections;
//! [`ConnectionDescriptor`] is built per accepted socket and is the only
//! handle I/O goes through. A secure descriptor exists only after the
//! server-side handshake completed, so reads and writes can never bypass TLS.

use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls::{ServerConfig, ServerConnection};

/// How long to wait for the peer's close_notify before treating the
/// connection as half-closed and tearing it down anyway.
const CLOSE_NOTIFY_WAIT: Duration = Duration::from_secs(1);

/// Failures of the transport layer.
#[derive(Debug)]
pub enum SecureError {
    /// Certificate file missing or unreadable.
    CertRead(PathBuf, io::Error),
    /// Private key file missing or unreadable.
    KeyRead(PathBuf, io::Error),
    /// The key file contained no usable private key.
    NoPrivateKey(PathBuf),
    /// rustls rejected the configuration or session.
    Tls(rustls::Error),
    /// The server-side handshake did not complete.
    Handshake(io::Error),
    /// Teardown of an established connection failed.
    Close(io::Error),
}

impl Display for SecureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertRead(path, err) => {
                write!(f, "could not read certificate {}: {err}", path.display())
            }
            Self::KeyRead(path, err) => {
                write!(f, "could not read private key {}: {err}", path.display())
            }
            Self::NoPrivateKey(path) => {
                write!(f, "no private key found in {}", path.display())
            }
            Self::Tls(err) => write!(f, "tls failure: {err}"),
            Self::Handshake(err) => write!(f, "tls handshake failed: {err}"),
            Self::Close(err) => write!(f, "connection close failed: {err}"),
        }
    }
}

impl std::error::Error for SecureError {}

impl From<rustls::Error> for SecureError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err)
    }
}

/// Server-wide transport configuration, shared read-only by all workers.
#[derive(Debug, Clone)]
pub enum SecureOptions {
    /// Sockets are used as-is.
    Plain,
    /// Every connection is wrapped in server-side TLS.
    Secure {
        /// Long-lived TLS context the per-worker sessions derive from.
        config: Arc<ServerConfig>,
    },
}

impl SecureOptions {
    /// Plaintext operation.
    pub fn plain() -> Self {
        Self::Plain
    }

    /// Loads `cert_path` and `key_path` (PEM) and builds the TLS context.
    ///
    /// Fails fast: missing files, unparsable PEM and a key that does not fit
    /// the certificate are all construction errors, not handshake errors.
    pub fn secure(cert_path: &Path, key_path: &Path) -> Result<Self, SecureError> {
        let cert_file = File::open(cert_path)
            .map_err(|err| SecureError::CertRead(cert_path.to_owned(), err))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SecureError::CertRead(cert_path.to_owned(), err))?;

        let key_file =
            File::open(key_path).map_err(|err| SecureError::KeyRead(key_path.to_owned(), err))?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(|err| SecureError::KeyRead(key_path.to_owned(), err))?
            .ok_or_else(|| SecureError::NoPrivateKey(key_path.to_owned()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self::Secure {
            config: Arc::new(config),
        })
    }

    /// Whether connections will be TLS-wrapped.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure { .. })
    }
}

/// Per-worker transport state, recycled across that worker's connections.
pub enum ConnectionContext {
    /// No state beyond the tag.
    Plain,
    /// Worker-local TLS state.
    Secure {
        /// The server-wide TLS context sessions derive from.
        config: Arc<ServerConfig>,
        /// Pre-allocated session so the next accept does not pay for session
        /// setup; `None` only while a descriptor has borrowed it.
        session: Option<Box<ServerConnection>>,
    },
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("ConnectionContext::Plain"),
            Self::Secure { session, .. } => f
                .debug_struct("ConnectionContext::Secure")
                .field("session_armed", &session.is_some())
                .finish(),
        }
    }
}

impl ConnectionContext {
    /// Derives a worker context from the server options.
    pub fn new(options: &SecureOptions) -> Result<Self, SecureError> {
        match options {
            SecureOptions::Plain => Ok(Self::Plain),
            SecureOptions::Secure { config } => {
                let session = ServerConnection::new(Arc::clone(config))?;
                Ok(Self::Secure {
                    config: Arc::clone(config),
                    session: Some(Box::new(session)),
                })
            }
        }
    }

    fn take_session(&mut self) -> Result<Box<ServerConnection>, SecureError> {
        match self {
            Self::Plain => unreachable!("plain context has no session"),
            Self::Secure { config, session } => match session.take() {
                Some(session) => Ok(session),
                // The previous descriptor failed before teardown could
                // re-arm; allocate the replacement now.
                None => Ok(Box::new(ServerConnection::new(Arc::clone(config))?)),
            },
        }
    }

    fn rearm(&mut self) -> Result<(), SecureError> {
        if let Self::Secure { config, session } = self {
            *session = Some(Box::new(ServerConnection::new(Arc::clone(config))?));
        }
        Ok(())
    }
}

/// One accepted connection, plaintext or TLS. I/O dispatches on the variant;
/// the variant never changes for the lifetime of the connection.
pub enum ConnectionDescriptor {
    /// Raw socket.
    Plain(TcpStream),
    /// Handshaken TLS session bound to the socket.
    Secure {
        /// The TLS session; all payload bytes pass through it.
        session: Box<ServerConnection>,
        /// The raw socket under the session.
        stream: TcpStream,
    },
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(stream) => f.debug_tuple("ConnectionDescriptor::Plain").field(stream).finish(),
            Self::Secure { stream, .. } => f
                .debug_struct("ConnectionDescriptor::Secure")
                .field("stream", stream)
                .finish(),
        }
    }
}

impl ConnectionDescriptor {
    /// Binds the worker's session to `stream` and, in secure mode, drives the
    /// server-side handshake to completion before returning.
    pub fn establish(
        context: &mut ConnectionContext,
        stream: TcpStream,
    ) -> Result<Self, SecureError> {
        match context {
            ConnectionContext::Plain => Ok(Self::Plain(stream)),
            ConnectionContext::Secure { .. } => {
                let mut session = context.take_session()?;
                let mut stream = stream;
                while session.is_handshaking() {
                    session
                        .complete_io(&mut stream)
                        .map_err(SecureError::Handshake)?;
                }
                Ok(Self::Secure { session, stream })
            }
        }
    }

    /// Tears the connection down.
    ///
    /// Secure descriptors send their close_notify, flush it, then wait a
    /// bounded time for the peer's half. A peer that never answers (or went
    /// away abruptly) is tolerated once our own close_notify is out. The
    /// worker's context is re-armed with a fresh session either way.
    pub fn close(self, context: &mut ConnectionContext) -> Result<(), SecureError> {
        match self {
            Self::Plain(stream) => {
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    if err.kind() != io::ErrorKind::NotConnected {
                        return Err(SecureError::Close(err));
                    }
                }
                Ok(())
            }
            Self::Secure {
                mut session,
                mut stream,
            } => {
                session.send_close_notify();
                while session.wants_write() {
                    if let Err(err) = session.write_tls(&mut stream) {
                        debug!("close_notify flush failed: {err}");
                        break;
                    }
                }

                let _ = stream.set_read_timeout(Some(CLOSE_NOTIFY_WAIT));
                loop {
                    match session.read_tls(&mut stream) {
                        Ok(0) => break,
                        Ok(_) => match session.process_new_packets() {
                            Ok(state) if state.peer_has_closed() => break,
                            Ok(_) => {}
                            Err(err) => {
                                debug!("ignoring teardown packets: {err}");
                                break;
                            }
                        },
                        // Our close_notify is sent; a silent peer is a
                        // successful half-close, not an error.
                        Err(err)
                            if err.kind() == io::ErrorKind::WouldBlock
                                || err.kind() == io::ErrorKind::TimedOut => break,
                        Err(err) => {
                            debug!("teardown read failed: {err}");
                            break;
                        }
                    }
                }

                let _ = stream.shutdown(Shutdown::Both);
                context.rearm()
            }
        }
    }
}

impl Read for ConnectionDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Secure { session, stream } => {
                rustls::Stream::new(session.as_mut(), stream).read(buf)
            }
        }
    }
}

impl Write for ConnectionDescriptor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Secure { session, stream } => {
                rustls::Stream::new(session.as_mut(), stream).write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Secure { session, stream } => {
                rustls::Stream::new(session.as_mut(), stream).flush()
            }
        }
    }
}
