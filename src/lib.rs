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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! rftpd is a threaded FTP control-channel server.
//!
//! One listener thread multiplexes the accept socket with a SIGINT
//! descriptor and feeds accepted connections into a fixed-size worker pool;
//! each worker drives a whole session over a plaintext or TLS descriptor.
//! The [`hpack`] and [`ws`] modules carry the HTTP/2 and WebSocket surfaces
//! used by protocol upgrades.

pub mod ftp;
pub mod hpack;
pub mod http2;
pub mod listener;
pub mod pool;
pub mod queue;
pub mod reader;
pub mod secure;
pub mod server;
pub mod shutdown;
pub mod ws;
