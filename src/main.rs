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

//! Binary entry point: argument parsing, logger setup, server lifecycle.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use rftpd::secure::SecureOptions;
use rftpd::server::{self, ServerConfig};

#[derive(Debug, Parser)]
#[command(about = "Threaded FTP control-channel server", version)]
struct Args {
    /// TCP port to listen on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Directory served to clients.
    #[arg(long, default_value = ".")]
    folder: PathBuf,

    /// PEM certificate chain; enables TLS together with --key.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key; enables TLS together with --cert.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env().init();

    let args = Args::parse();

    let secure = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => SecureOptions::secure(cert, key)
            .context("could not load TLS certificate material")?,
        _ => SecureOptions::plain(),
    };

    server::run(ServerConfig {
        port: args.port,
        serve_root: args.folder,
        secure,
        worker_count: None,
    })
    .context("server terminated abnormally")?;

    Ok(())
}
