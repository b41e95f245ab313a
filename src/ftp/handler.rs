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

//! Per-connection FTP session: greeting, read-parse-dispatch loop, teardown.

use std::fmt::{self, Display};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, error, trace};

use crate::ftp::command::{FtpCommand, PortInfo, TransmissionType};
use crate::pool::WorkerInfo;
use crate::reader::BufferedReader;
use crate::secure::{ConnectionContext, ConnectionDescriptor};

/// Terminal status of one connection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// The connection descriptor could not be established (TLS handshake
    /// failure included).
    Descriptor,
    /// The descriptor could not be torn down cleanly.
    Close,
}

impl Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Descriptor => "could not establish the connection descriptor",
            Self::Close => "could not close the connection descriptor",
        })
    }
}

impl std::error::Error for JobError {}

/// What a connection job resolves to once awaited.
pub type JobOutcome = Result<(), JobError>;

/// Mutable per-session protocol state.
#[derive(Debug)]
pub struct FtpState {
    /// Directory the server serves out of.
    pub root: PathBuf,
    /// Session working directory, `/`-rooted and virtual.
    pub cwd: String,
    /// Representation negotiated by `TYPE`.
    pub transmission_type: TransmissionType,
    /// Data-channel endpoint announced by the last `PORT`.
    pub data_peer: Option<PortInfo>,
}

impl FtpState {
    /// Fresh state rooted at the serve folder.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cwd: String::from("/"),
            transmission_type: TransmissionType::Ascii,
            data_peer: None,
        }
    }
}

/// Everything a worker needs to run one accepted connection.
#[derive(Debug)]
pub struct ConnectionArgument {
    /// Per-worker transport contexts, indexed by worker.
    pub contexts: Arc<Vec<Mutex<ConnectionContext>>>,
    /// The freshly accepted socket.
    pub stream: TcpStream,
    /// Initial session state.
    pub state: FtpState,
}

/// Runs a whole connection on the executing worker: establishes the
/// descriptor (TLS handshake included), drives the session loop, closes the
/// descriptor. This is the function submitted to the pool per accept.
pub fn handle_connection(argument: ConnectionArgument, info: WorkerInfo) -> JobOutcome {
    set_thread_name(&format!("connection handler {}", info.worker_index));
    trace!("starting connection handler");

    let ConnectionArgument {
        contexts,
        stream,
        mut state,
    } = argument;

    // The context belongs to this worker alone; the lock is only there to
    // share the contexts array across the pool, and is never contended.
    let descriptor = {
        let mut context = contexts[info.worker_index]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match ConnectionDescriptor::establish(&mut context, stream) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                error!("could not establish connection descriptor: {err}");
                return Err(JobError::Descriptor);
            }
        }
    };

    let descriptor = run_session(descriptor, &mut state);

    let mut context = contexts[info.worker_index]
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    descriptor.close(&mut context).map_err(|err| {
        error!("could not close connection descriptor: {err}");
        JobError::Close
    })
}

/// The session loop proper, generic over the byte stream so it can be driven
/// without a socket.
fn run_session<S: Read + Write>(stream: S, state: &mut FtpState) -> S {
    let mut reader = BufferedReader::new(stream);

    if let Err(err) = send_reply(reader.get_mut(), 220, "Simple FTP Server") {
        debug!("could not send greeting: {err}");
        return reader.into_inner();
    }

    let mut quit = false;
    while !quit {
        let read = reader.read_until_delimiter(b"\r\n");
        let parsed = match read {
            Ok(line) => Some(FtpCommand::parse(line)),
            Err(err) => {
                debug!("connection read failed: {err}");
                None
            }
        };

        match parsed {
            None => {
                // RFC 959 would want a 4xx/5xx here; the reply code is pinned
                // to 200 for wire compatibility.
                let _ = send_reply(
                    reader.get_mut(),
                    200,
                    "Request couldn't be read, a connection error occurred!",
                );
                break;
            }
            Some(Err(err)) => {
                debug!("command parse failed: {err}");
                let _ = send_reply(
                    reader.get_mut(),
                    500,
                    "Request couldn't be parsed, it was malformed!",
                );
                break;
            }
            Some(Ok(command)) => {
                trace!("dispatching {}", command.name());
                let reply = dispatch(command, state);
                quit = reply.quit;
                if let Err(err) = send_reply(reader.get_mut(), reply.code, &reply.text) {
                    debug!("could not send response: {err}");
                    break;
                }
            }
        }
    }

    reader.into_inner()
}

struct Reply {
    code: u16,
    text: String,
    quit: bool,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            quit: false,
        }
    }
}

// The control-channel reply set. Everything needing a data channel stays
// unimplemented until PASV/PORT transfers exist.
fn dispatch(command: FtpCommand, state: &mut FtpState) -> Reply {
    match command {
        FtpCommand::Quit => Reply {
            quit: true,
            ..Reply::new(221, "Service closing control connection")
        },
        FtpCommand::Noop => Reply::new(200, "Command okay"),
        FtpCommand::Syst => Reply::new(215, "UNIX Type: L8"),
        FtpCommand::Feat => Reply::new(211, "End"),
        FtpCommand::Pwd => Reply::new(257, format!("\"{}\" is the current directory", state.cwd)),
        FtpCommand::User(_) => Reply::new(331, "User name okay, need password"),
        FtpCommand::Pass(_) => Reply::new(230, "User logged in, proceed"),
        FtpCommand::Type(info) => {
            state.transmission_type = info.transmission_type;
            Reply::new(
                200,
                format!("Type set to {}", info.transmission_type.code()),
            )
        }
        FtpCommand::Port(info) => {
            state.data_peer = Some(info);
            Reply::new(200, "PORT command successful")
        }
        other => Reply::new(502, format!("{} not implemented", other.name())),
    }
}

/// Writes one `<code> <text>\r\n` control-channel reply.
fn send_reply<W: Write>(writer: &mut W, code: u16, text: &str) -> std::io::Result<()> {
    writer.write_all(format!("{code} {text}\r\n").as_bytes())?;
    writer.flush()
}

/// Names the calling OS thread, truncated by the kernel to 15 bytes.
fn set_thread_name(name: &str) {
    if let Ok(name) = std::ffi::CString::new(name) {
        // Safety: PR_SET_NAME only reads the NUL-terminated buffer.
        unsafe {
            libc::prctl(libc::PR_SET_NAME, name.as_ptr());
        }
    }
}
