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

//! `Sec-WebSocket-Extensions` negotiation
//! [IETF RFC 6455 Section 9.1](https://datatracker.ietf.org/doc/html/rfc6455#section-9.1)
//! and `permessage-deflate`
//! [IETF RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692)

use std::fmt::Write as _;

const DEFAULT_MAX_WINDOW_BITS: u8 = 15;
const MIN_MAX_WINDOW_BITS: u8 = 8;

/// Deflate parameters for one direction of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateEndpoint {
    /// Whether the compression context is dropped between messages.
    pub no_context_takeover: bool,
    /// LZ77 sliding-window size as a power of two, in `[8, 15]`.
    pub max_window_bits: u8,
}

/// Negotiated `permessage-deflate` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateOptions {
    /// Client-to-server direction.
    pub client: DeflateEndpoint,
    /// Server-to-client direction.
    pub server: DeflateEndpoint,
}

impl Default for DeflateOptions {
    fn default() -> Self {
        Self {
            client: DeflateEndpoint {
                no_context_takeover: false,
                max_window_bits: DEFAULT_MAX_WINDOW_BITS,
            },
            server: DeflateEndpoint {
                no_context_takeover: true,
                max_window_bits: DEFAULT_MAX_WINDOW_BITS,
            },
        }
    }
}

/// A recognized extension offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsExtension {
    /// Per-message compression with DEFLATE.
    PerMessageDeflate(DeflateOptions),
}

/// Parses a `Sec-WebSocket-Extensions` header value.
///
/// Offers are comma-separated, parameters semicolon-separated. An offer with
/// an unknown extension name, an unknown parameter or an out-of-range value
/// is dropped; the remaining offers are still returned.
pub fn parse_extensions(value: &str) -> Vec<WsExtension> {
    value
        .split(',')
        .filter_map(parse_extension_value)
        .collect()
}

fn parse_extension_value(offer: &str) -> Option<WsExtension> {
    let mut parts = offer.split(';');
    let name = parts.next()?.trim();

    if name != "permessage-deflate" {
        return None;
    }

    let mut options = DeflateOptions::default();
    for param in parts {
        apply_deflate_param(param.trim(), &mut options)?;
    }

    Some(WsExtension::PerMessageDeflate(options))
}

fn apply_deflate_param(param: &str, options: &mut DeflateOptions) -> Option<()> {
    let (name, value) = match param.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (param, None),
    };

    match name {
        "server_no_context_takeover" => {
            if value.is_some() {
                return None;
            }
            options.server.no_context_takeover = true;
        }
        "client_no_context_takeover" => {
            if value.is_some() {
                return None;
            }
            options.client.no_context_takeover = true;
        }
        "server_max_window_bits" => {
            options.server.max_window_bits = parse_window_bits(value)?;
        }
        "client_max_window_bits" => {
            options.client.max_window_bits = parse_window_bits(value)?;
        }
        _ => return None,
    }

    Some(())
}

fn parse_window_bits(value: Option<&str>) -> Option<u8> {
    let value = match value {
        None => return Some(DEFAULT_MAX_WINDOW_BITS),
        Some(value) => value,
    };

    let bits: u8 = value.parse().ok()?;
    if (MIN_MAX_WINDOW_BITS..=DEFAULT_MAX_WINDOW_BITS).contains(&bits) {
        Some(bits)
    } else {
        None
    }
}

/// Serializes the accepted extensions for the upgrade response.
///
/// Both window sizes are always echoed; the context-takeover flags only when
/// set. Parameters are `;`-separated, extensions `,`-separated.
pub fn accepted_extensions_header(extensions: &[WsExtension]) -> String {
    let mut header = String::new();

    for (index, extension) in extensions.iter().enumerate() {
        if index > 0 {
            header.push(',');
        }

        match extension {
            WsExtension::PerMessageDeflate(options) => {
                let _ = write!(
                    header,
                    "permessage-deflate;server_max_window_bits={};client_max_window_bits={}",
                    options.server.max_window_bits, options.client.max_window_bits
                );
                if options.server.no_context_takeover {
                    header.push_str(";server_no_context_takeover");
                }
                if options.client.no_context_takeover {
                    header.push_str(";client_no_context_takeover");
                }
            }
        }
    }

    header
}

#[cfg(test)]
mod test {
    use super::{
        accepted_extensions_header, parse_extensions, DeflateOptions, WsExtension,
    };

    fn single(value: &str) -> DeflateOptions {
        match parse_extensions(value).as_slice() {
            [WsExtension::PerMessageDeflate(options)] => *options,
            other => panic!("expected one permessage-deflate offer, got {other:?}"),
        }
    }

    #[test]
    fn bare_offer_takes_the_defaults() {
        let options = single("permessage-deflate");
        assert_eq!(15, options.client.max_window_bits);
        assert_eq!(15, options.server.max_window_bits);
        assert!(!options.client.no_context_takeover);
        assert!(options.server.no_context_takeover);
    }

    #[test]
    fn parameters_are_applied() {
        let options = single(
            "permessage-deflate; client_max_window_bits=10; server_max_window_bits=12; \
             client_no_context_takeover",
        );
        assert_eq!(10, options.client.max_window_bits);
        assert_eq!(12, options.server.max_window_bits);
        assert!(options.client.no_context_takeover);
    }

    #[test]
    fn valueless_window_bits_mean_the_default() {
        let options = single("permessage-deflate; client_max_window_bits");
        assert_eq!(15, options.client.max_window_bits);
    }

    #[test]
    fn out_of_range_window_bits_drop_the_offer() {
        assert!(parse_extensions("permessage-deflate; server_max_window_bits=16").is_empty());
        assert!(parse_extensions("permessage-deflate; client_max_window_bits=7").is_empty());
        assert!(parse_extensions("permessage-deflate; client_max_window_bits=abc").is_empty());
    }

    #[test]
    fn takeover_flags_reject_values() {
        assert!(parse_extensions("permessage-deflate; server_no_context_takeover=1").is_empty());
    }

    #[test]
    fn unknown_extensions_and_params_are_dropped() {
        assert!(parse_extensions("x-webkit-deflate-frame").is_empty());
        assert!(parse_extensions("permessage-deflate; mystery_param=1").is_empty());

        // A bad offer does not poison the good one next to it.
        let offers = parse_extensions("x-webkit-deflate-frame, permessage-deflate");
        assert_eq!(1, offers.len());
    }

    #[test]
    fn acknowledgment_is_canonical() {
        let offers = parse_extensions("permessage-deflate; client_no_context_takeover");
        assert_eq!(
            "permessage-deflate;server_max_window_bits=15;client_max_window_bits=15;\
             server_no_context_takeover;client_no_context_takeover",
            accepted_extensions_header(&offers)
        );
    }

    #[test]
    fn acknowledgment_without_flags_ends_after_window_bits() {
        let options = DeflateOptions {
            client: super::DeflateEndpoint {
                no_context_takeover: false,
                max_window_bits: 11,
            },
            server: super::DeflateEndpoint {
                no_context_takeover: false,
                max_window_bits: 9,
            },
        };
        assert_eq!(
            "permessage-deflate;server_max_window_bits=9;client_max_window_bits=11",
            accepted_extensions_header(&[WsExtension::PerMessageDeflate(options)])
        );
    }
}
