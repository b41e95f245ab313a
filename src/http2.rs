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

//! HTTP/2 connection preface and frame-header layer
//! [IETF RFC 7540](https://datatracker.ietf.org/doc/html/rfc7540)

use std::fmt::Display;

/// The fixed byte sequence every HTTP/2 client connection starts with.
/// [RFC 7540 Section 3.5](https://datatracker.ietf.org/doc/html/rfc7540#section-3.5)
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Octets of every frame header on the wire.
pub const FRAME_HEADER_LEN: usize = 9;

/// Frame types of RFC 7540 Section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// 0x0 — application data.
    Data,
    /// 0x1 — header block fragment opening a stream.
    Headers,
    /// 0x2 — stream priority hint.
    Priority,
    /// 0x3 — immediate stream termination.
    RstStream,
    /// 0x4 — connection settings exchange.
    Settings,
    /// 0x5 — server push announcement.
    PushPromise,
    /// 0x6 — liveness check.
    Ping,
    /// 0x7 — connection shutdown notice.
    Goaway,
    /// 0x8 — flow-control window growth.
    WindowUpdate,
    /// 0x9 — header block continuation.
    Continuation,
}

impl FrameType {
    /// Maps a wire code to its frame type.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::Goaway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            _ => return None,
        })
    }

    /// The wire code of this frame type.
    pub fn code(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::Goaway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
        }
    }
}

/// A frame header could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The type code is outside RFC 7540; the frame must be ignored or the
    /// connection torn down depending on context.
    UnknownType(u8),
}

impl Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType(code) => write!(f, "unknown frame type 0x{code:02x}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// The fixed 9-octet header in front of every frame payload.
/// [RFC 7540 Section 4.1](https://datatracker.ietf.org/doc/html/rfc7540#section-4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (24 bits on the wire).
    pub length: u32,
    /// Frame type.
    pub frame_type: FrameType,
    /// Type-specific flag bits.
    pub flags: u8,
    /// Stream identifier; 0 addresses the connection. The wire's reserved
    /// high bit is dropped on parse.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parses the 9 header octets.
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self, FrameError> {
        let length = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
        let frame_type = FrameType::from_code(bytes[3]).ok_or(FrameError::UnknownType(bytes[3]))?;
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff;

        Ok(Self {
            length,
            frame_type,
            flags: bytes[4],
            stream_id,
        })
    }

    /// Serializes the header back to its 9 wire octets.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let stream = (self.stream_id & 0x7fff_ffff).to_be_bytes();
        [
            (self.length >> 16) as u8,
            (self.length >> 8) as u8,
            self.length as u8,
            self.frame_type.code(),
            self.flags,
            stream[0],
            stream[1],
            stream[2],
            stream[3],
        ]
    }
}

#[cfg(test)]
mod test {
    use super::{FrameError, FrameHeader, FrameType, CLIENT_PREFACE, FRAME_HEADER_LEN};

    #[test]
    fn preface_is_24_octets() {
        assert_eq!(24, CLIENT_PREFACE.len());
        assert!(CLIENT_PREFACE.starts_with(b"PRI * HTTP/2.0"));
    }

    #[test]
    fn empty_settings_frame_parses() {
        // The first frame a server typically sees after the preface.
        let header = FrameHeader::parse(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(0, header.length);
        assert_eq!(FrameType::Settings, header.frame_type);
        assert_eq!(0, header.flags);
        assert_eq!(0, header.stream_id);
    }

    #[test]
    fn headers_round_trip_through_the_wire_form() {
        let header = FrameHeader {
            length: 0x01_02_03,
            frame_type: FrameType::Headers,
            flags: 0x05,
            stream_id: 7,
        };

        let wire = header.encode();
        assert_eq!(FRAME_HEADER_LEN, wire.len());
        assert_eq!(header, FrameHeader::parse(&wire).unwrap());
    }

    #[test]
    fn reserved_stream_bit_is_dropped() {
        let header = FrameHeader::parse(&[0, 0, 1, 0x0, 0, 0x80, 0, 0, 1]).unwrap();
        assert_eq!(1, header.stream_id);
    }

    #[test]
    fn unknown_type_codes_are_rejected() {
        assert_eq!(
            Err(FrameError::UnknownType(0xaa)),
            FrameHeader::parse(&[0, 0, 0, 0xaa, 0, 0, 0, 0, 0])
        );
    }

    #[test]
    fn every_type_code_round_trips() {
        for code in 0x0..=0x9 {
            let frame_type = FrameType::from_code(code).unwrap();
            assert_eq!(code, frame_type.code());
        }
        assert!(FrameType::from_code(0xa).is_none());
    }
}
