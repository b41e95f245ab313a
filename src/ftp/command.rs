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

//! Command grammar of the FTP control channel
//! [IETF RFC 959 Section 5.3.1](https://datatracker.ietf.org/doc/html/rfc959)

use std::fmt::Display;
use std::net::Ipv4Addr;

/// Data representation negotiated by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionType {
    /// `A` — ASCII, the default.
    Ascii,
    /// `E` — EBCDIC.
    Ebcdic,
    /// `I` — image (binary octets).
    Image,
}

impl TransmissionType {
    /// The single-letter type code.
    pub fn code(self) -> char {
        match self {
            Self::Ascii => 'A',
            Self::Ebcdic => 'E',
            Self::Image => 'I',
        }
    }
}

/// Argument of a `TYPE` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Requested data representation.
    pub transmission_type: TransmissionType,
}

/// Argument of a `PORT` command: the client's data-channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    /// IPv4 address, first four octets of the argument.
    pub addr: Ipv4Addr,
    /// Port, reconstructed high byte first from the last two octets.
    pub port: u16,
}

/// Why a line failed to parse as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Below the three bytes any command needs.
    TooShort,
    /// Token not in the command vocabulary.
    UnknownCommand,
    /// A command that requires an argument arrived without one.
    MissingArgument,
    /// The argument was not valid UTF-8.
    BadEncoding,
    /// `TYPE` with a code other than `A`, `E` or `I`.
    BadTypeCode,
    /// `PORT` without exactly six in-range decimal octets.
    BadPortArgument,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::TooShort => "line shorter than any command",
            Self::UnknownCommand => "unknown command token",
            Self::MissingArgument => "command argument missing",
            Self::BadEncoding => "command argument is not valid utf-8",
            Self::BadTypeCode => "unsupported transmission type code",
            Self::BadPortArgument => "malformed PORT argument",
        })
    }
}

impl std::error::Error for ParseError {}

/// One parsed control-channel command, tagged with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    /// `CDUP` — change to parent directory.
    Cdup,
    /// `QUIT` — end the session.
    Quit,
    /// `REIN` — reinitialize.
    Rein,
    /// `PASV` — request passive data connection.
    Pasv,
    /// `STOU` — store with unique name.
    Stou,
    /// `ABOR` — abort the previous command.
    Abor,
    /// `PWD` — print working directory.
    Pwd,
    /// `SYST` — report system type.
    Syst,
    /// `NOOP` — no operation.
    Noop,
    /// `FEAT` — list server features.
    Feat,
    /// `LIST [path]` — directory listing.
    List(Option<String>),
    /// `NLST [path]` — name-only listing.
    Nlst(Option<String>),
    /// `STAT [path]` — status.
    Stat(Option<String>),
    /// `HELP [topic]` — help text.
    Help(Option<String>),
    /// `USER <name>`.
    User(String),
    /// `PASS <password>`.
    Pass(String),
    /// `ACCT <account>`.
    Acct(String),
    /// `CWD <path>`.
    Cwd(String),
    /// `SMNT <path>`.
    Smnt(String),
    /// `RETR <path>`.
    Retr(String),
    /// `STOR <path>`.
    Stor(String),
    /// `APPE <path>`.
    Appe(String),
    /// `RNFR <path>`.
    Rnfr(String),
    /// `RNTO <path>`.
    Rnto(String),
    /// `DELE <path>`.
    Dele(String),
    /// `RMD <path>`.
    Rmd(String),
    /// `MKD <path>`.
    Mkd(String),
    /// `SITE <params>`.
    Site(String),
    /// `AUTH <mechanism>`.
    Auth(String),
    /// `ADAT <data>`.
    Adat(String),
    /// `MIC <data>`.
    Mic(String),
    /// `CONF <data>`.
    Conf(String),
    /// `ENC <data>`.
    Enc(String),
    /// `TYPE <code>`.
    Type(TypeInfo),
    /// `PORT <h1,h2,h3,h4,p1,p2>`.
    Port(PortInfo),
}

impl FtpCommand {
    /// The canonical (upper-case) command token.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cdup => "CDUP",
            Self::Quit => "QUIT",
            Self::Rein => "REIN",
            Self::Pasv => "PASV",
            Self::Stou => "STOU",
            Self::Abor => "ABOR",
            Self::Pwd => "PWD",
            Self::Syst => "SYST",
            Self::Noop => "NOOP",
            Self::Feat => "FEAT",
            Self::List(_) => "LIST",
            Self::Nlst(_) => "NLST",
            Self::Stat(_) => "STAT",
            Self::Help(_) => "HELP",
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::Acct(_) => "ACCT",
            Self::Cwd(_) => "CWD",
            Self::Smnt(_) => "SMNT",
            Self::Retr(_) => "RETR",
            Self::Stor(_) => "STOR",
            Self::Appe(_) => "APPE",
            Self::Rnfr(_) => "RNFR",
            Self::Rnto(_) => "RNTO",
            Self::Dele(_) => "DELE",
            Self::Rmd(_) => "RMD",
            Self::Mkd(_) => "MKD",
            Self::Site(_) => "SITE",
            Self::Auth(_) => "AUTH",
            Self::Adat(_) => "ADAT",
            Self::Mic(_) => "MIC",
            Self::Conf(_) => "CONF",
            Self::Enc(_) => "ENC",
            Self::Type(_) => "TYPE",
            Self::Port(_) => "PORT",
        }
    }

    /// Parses one delimiter-stripped control-channel line.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        if line.len() < 3 {
            return Err(ParseError::TooShort);
        }

        // Whole-line commands first: everything that takes no argument, plus
        // the optional-argument commands in their bare form.
        if let Some(command) = Self::match_bare(line) {
            return Ok(command);
        }

        let space = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ParseError::UnknownCommand)?;
        let (token, argument) = (&line[..space], &line[space + 1..]);

        if token.eq_ignore_ascii_case(b"TYPE") {
            return parse_type_info(argument).map(Self::Type);
        }
        if token.eq_ignore_ascii_case(b"PORT") {
            return parse_port_info(argument).map(Self::Port);
        }

        for (name, build) in OPTIONAL_ARG_COMMANDS {
            if token.eq_ignore_ascii_case(name.as_bytes()) {
                if argument.is_empty() {
                    return Ok(build(None));
                }
                return Ok(build(Some(decode_argument(argument)?)));
            }
        }

        for (name, build) in STRING_ARG_COMMANDS {
            if token.eq_ignore_ascii_case(name.as_bytes()) {
                if argument.is_empty() {
                    return Err(ParseError::MissingArgument);
                }
                return Ok(build(decode_argument(argument)?));
            }
        }

        Err(ParseError::UnknownCommand)
    }

    fn match_bare(line: &[u8]) -> Option<Self> {
        const BARE: &[(&str, FtpCommand)] = &[
            ("CDUP", FtpCommand::Cdup),
            ("QUIT", FtpCommand::Quit),
            ("REIN", FtpCommand::Rein),
            ("PASV", FtpCommand::Pasv),
            ("STOU", FtpCommand::Stou),
            ("ABOR", FtpCommand::Abor),
            ("PWD", FtpCommand::Pwd),
            ("SYST", FtpCommand::Syst),
            ("NOOP", FtpCommand::Noop),
            ("FEAT", FtpCommand::Feat),
            ("LIST", FtpCommand::List(None)),
            ("NLST", FtpCommand::Nlst(None)),
            ("STAT", FtpCommand::Stat(None)),
            ("HELP", FtpCommand::Help(None)),
        ];

        BARE.iter()
            .find(|(name, _)| line.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, command)| command.clone())
    }
}

type OptionalBuild = fn(Option<String>) -> FtpCommand;
type StringBuild = fn(String) -> FtpCommand;

const OPTIONAL_ARG_COMMANDS: &[(&str, OptionalBuild)] = &[
    ("LIST", FtpCommand::List),
    ("NLST", FtpCommand::Nlst),
    ("STAT", FtpCommand::Stat),
    ("HELP", FtpCommand::Help),
];

const STRING_ARG_COMMANDS: &[(&str, StringBuild)] = &[
    ("USER", FtpCommand::User),
    ("PASS", FtpCommand::Pass),
    ("ACCT", FtpCommand::Acct),
    ("CWD", FtpCommand::Cwd),
    ("SMNT", FtpCommand::Smnt),
    ("RETR", FtpCommand::Retr),
    ("STOR", FtpCommand::Stor),
    ("APPE", FtpCommand::Appe),
    ("RNFR", FtpCommand::Rnfr),
    ("RNTO", FtpCommand::Rnto),
    ("DELE", FtpCommand::Dele),
    ("RMD", FtpCommand::Rmd),
    ("MKD", FtpCommand::Mkd),
    ("SITE", FtpCommand::Site),
    ("AUTH", FtpCommand::Auth),
    ("ADAT", FtpCommand::Adat),
    ("MIC", FtpCommand::Mic),
    ("CONF", FtpCommand::Conf),
    ("ENC", FtpCommand::Enc),
];

/// Arguments are carried byte-exact, without trimming.
fn decode_argument(argument: &[u8]) -> Result<String, ParseError> {
    String::from_utf8(argument.to_vec()).map_err(|_| ParseError::BadEncoding)
}

// <type-code> ::= A [<sp> <form-code>] | E [<sp> <form-code>] | I
//               | L <sp> <byte-size>
// Only the three bare single-letter codes are accepted; form codes and
// local byte sizes are rejected until a data channel exists to honor them.
fn parse_type_info(argument: &[u8]) -> Result<TypeInfo, ParseError> {
    let transmission_type = match argument {
        b"A" => TransmissionType::Ascii,
        b"E" => TransmissionType::Ebcdic,
        b"I" => TransmissionType::Image,
        _ => return Err(ParseError::BadTypeCode),
    };

    Ok(TypeInfo { transmission_type })
}

// <host-port> ::= <number>,<number>,<number>,<number>,<number>,<number>
// with every number a decimal in [0,255]; the last two form the port,
// high byte first.
fn parse_port_info(argument: &[u8]) -> Result<PortInfo, ParseError> {
    let mut octets = [0u8; 6];
    let mut tokens = argument.split(|&b| b == b',');

    for slot in &mut octets {
        let token = tokens.next().ok_or(ParseError::BadPortArgument)?;
        *slot = parse_octet(token)?;
    }
    if tokens.next().is_some() {
        return Err(ParseError::BadPortArgument);
    }

    Ok(PortInfo {
        addr: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
        port: (u16::from(octets[4]) << 8) | u16::from(octets[5]),
    })
}

fn parse_octet(token: &[u8]) -> Result<u8, ParseError> {
    if token.is_empty() || token.len() > 3 || !token.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::BadPortArgument);
    }

    let mut value: u16 = 0;
    for &digit in token {
        value = value * 10 + u16::from(digit - b'0');
    }
    u8::try_from(value).map_err(|_| ParseError::BadPortArgument)
}
