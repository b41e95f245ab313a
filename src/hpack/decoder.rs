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

//! Header-block decoding
//! [IETF RFC 7541 Section 6](https://datatracker.ietf.org/doc/html/rfc7541#section-6)

use std::fmt::Display;

use super::huffman::{self, HuffmanError};
use super::integer::{self, IntegerError};
use super::{DynamicTable, HeaderEntry};

/// Entries 1 through 61 of the static table
/// [RFC 7541 Appendix A](https://datatracker.ietf.org/doc/html/rfc7541#appendix-A)
#[rustfmt::skip]
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Default dynamic-table budget before any size update.
const DEFAULT_TABLE_SIZE: usize = 4096;

/// Why a header block failed to decode.
#[derive(Debug)]
pub enum DecodeError {
    /// Index 0, or an index past both tables.
    InvalidIndex(u64),
    /// A length-prefixed integer was malformed.
    Integer(IntegerError),
    /// A Huffman-coded string literal was malformed.
    Huffman(HuffmanError),
    /// The block ended inside a representation.
    Truncated,
    /// A decoded string was not valid UTF-8.
    BadUtf8,
    /// A dynamic-table size update exceeded the configured ceiling.
    SizeUpdateTooLarge(u64),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIndex(index) => write!(f, "header index {index} is not valid"),
            Self::Integer(err) => write!(f, "{err}"),
            Self::Huffman(err) => write!(f, "{err}"),
            Self::Truncated => f.write_str("header block is truncated"),
            Self::BadUtf8 => f.write_str("header string is not valid utf-8"),
            Self::SizeUpdateTooLarge(size) => {
                write!(f, "dynamic table size update to {size} exceeds the ceiling")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<IntegerError> for DecodeError {
    fn from(err: IntegerError) -> Self {
        Self::Integer(err)
    }
}

impl From<HuffmanError> for DecodeError {
    fn from(err: HuffmanError) -> Self {
        Self::Huffman(err)
    }
}

/// Stateful header-block decoder: the static table plus one dynamic table
/// whose contents persist across blocks of the same connection.
#[derive(Debug)]
pub struct Decoder {
    dynamic: DynamicTable,
    /// Upper bound size updates may raise the dynamic table to.
    ceiling: usize,
}

impl Decoder {
    /// Decoder with the protocol-default 4096-octet table budget.
    pub fn new() -> Self {
        Self::with_table_size(DEFAULT_TABLE_SIZE)
    }

    /// Decoder whose dynamic table starts (and is capped) at `max_size`.
    pub fn with_table_size(max_size: usize) -> Self {
        Self {
            dynamic: DynamicTable::new(max_size),
            ceiling: max_size,
        }
    }

    /// The dynamic table as populated by the blocks decoded so far.
    pub fn dynamic_table(&self) -> &DynamicTable {
        &self.dynamic
    }

    /// Decodes one complete header block into its header list.
    pub fn decode_block(&mut self, block: &[u8]) -> Result<Vec<HeaderEntry>, DecodeError> {
        let mut input = block;
        let mut headers = Vec::new();

        while let Some(&first) = input.first() {
            if first & 0x80 != 0 {
                // Indexed field.
                let (index, used) = integer::decode(input, 7)?;
                input = &input[used..];
                headers.push(self.lookup(index)?);
            } else if first & 0xc0 == 0x40 {
                // Literal with incremental indexing.
                let (entry, used) = self.read_literal(input, 6)?;
                input = &input[used..];
                self.dynamic.insert(entry.clone());
                headers.push(entry);
            } else if first & 0xe0 == 0x20 {
                // Dynamic table size update.
                let (size, used) = integer::decode(input, 5)?;
                input = &input[used..];
                if size > self.ceiling as u64 {
                    return Err(DecodeError::SizeUpdateTooLarge(size));
                }
                self.dynamic.set_max_size(size as usize);
            } else {
                // Literal without indexing (0000) or never indexed (0001);
                // both leave the tables untouched.
                let (entry, used) = self.read_literal(input, 4)?;
                input = &input[used..];
                headers.push(entry);
            }
        }

        Ok(headers)
    }

    fn lookup(&self, index: u64) -> Result<HeaderEntry, DecodeError> {
        if index == 0 {
            return Err(DecodeError::InvalidIndex(index));
        }
        if index <= STATIC_TABLE.len() as u64 {
            let (name, value) = STATIC_TABLE[(index - 1) as usize];
            return Ok(HeaderEntry::new(name, value));
        }

        let dynamic_index = (index - 1 - STATIC_TABLE.len() as u64) as usize;
        self.dynamic
            .get(dynamic_index)
            .cloned()
            .ok_or(DecodeError::InvalidIndex(index))
    }

    fn read_literal(
        &self,
        input: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderEntry, usize), DecodeError> {
        let (name_index, mut used) = integer::decode(input, prefix_bits)?;

        let name = if name_index == 0 {
            let (name, n) = read_string(&input[used..])?;
            used += n;
            name
        } else {
            self.lookup(name_index)?.name
        };

        let (value, n) = read_string(&input[used..])?;
        used += n;

        Ok((HeaderEntry { name, value }, used))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_string(input: &[u8]) -> Result<(String, usize), DecodeError> {
    let first = *input.first().ok_or(DecodeError::Truncated)?;
    let huffman_coded = first & 0x80 != 0;

    let (length, used) = integer::decode(input, 7)?;
    let length = usize::try_from(length).map_err(|_| DecodeError::Truncated)?;
    let end = used.checked_add(length).ok_or(DecodeError::Truncated)?;
    if input.len() < end {
        return Err(DecodeError::Truncated);
    }

    let raw = &input[used..end];
    let bytes = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };

    let text = String::from_utf8(bytes).map_err(|_| DecodeError::BadUtf8)?;
    Ok((text, end))
}

#[cfg(test)]
mod test {
    use super::{DecodeError, Decoder};

    fn unhex(hex: &str) -> Vec<u8> {
        let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    fn pairs(headers: &[super::HeaderEntry]) -> Vec<(&str, &str)> {
        headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
            .collect()
    }

    // The three-request series of RFC 7541 Appendix C.3 (plain literals).
    #[test]
    fn request_series_without_huffman() {
        let mut decoder = Decoder::new();

        let first = decoder
            .decode_block(&unhex("8286 8441 0f77 7777 2e65 7861 6d70 6c65 2e63 6f6d"))
            .unwrap();
        assert_eq!(
            vec![
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ],
            pairs(&first)
        );
        assert_eq!(1, decoder.dynamic_table().len());
        assert_eq!(57, decoder.dynamic_table().size());

        let second = decoder
            .decode_block(&unhex("8286 84be 5808 6e6f 2d63 6163 6865"))
            .unwrap();
        assert_eq!(
            vec![
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ],
            pairs(&second)
        );
        assert_eq!(2, decoder.dynamic_table().len());
        assert_eq!(110, decoder.dynamic_table().size());

        let third = decoder
            .decode_block(&unhex(
                "8287 85bf 400a 6375 7374 6f6d 2d6b 6579 0c63 7573 746f 6d2d 7661 6c75 65",
            ))
            .unwrap();
        assert_eq!(
            vec![
                (":method", "GET"),
                (":scheme", "https"),
                (":path", "/index.html"),
                (":authority", "www.example.com"),
                ("custom-key", "custom-value"),
            ],
            pairs(&third)
        );

        assert_eq!(3, decoder.dynamic_table().len());
        assert_eq!(164, decoder.dynamic_table().size());
        assert_eq!("custom-key", decoder.dynamic_table().get(0).unwrap().name);
        assert_eq!("cache-control", decoder.dynamic_table().get(1).unwrap().name);
        assert_eq!(":authority", decoder.dynamic_table().get(2).unwrap().name);
    }

    // The same series Huffman-coded, RFC 7541 Appendix C.4.
    #[test]
    fn request_series_with_huffman() {
        let mut decoder = Decoder::new();

        let first = decoder
            .decode_block(&unhex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff"))
            .unwrap();
        assert_eq!((":authority", "www.example.com"), pairs(&first)[3]);

        let second = decoder
            .decode_block(&unhex("8286 84be 5886 a8eb 1064 9cbf"))
            .unwrap();
        assert_eq!(("cache-control", "no-cache"), pairs(&second)[4]);

        let third = decoder
            .decode_block(&unhex(
                "8287 85bf 4088 25a8 49e9 5ba9 7d7f 8925 a849 e95b b8e8 b4bf",
            ))
            .unwrap();
        assert_eq!(("custom-key", "custom-value"), pairs(&third)[4]);
        assert_eq!(164, decoder.dynamic_table().size());
    }

    #[test]
    fn size_update_shrinks_and_respects_the_ceiling() {
        let mut decoder = Decoder::with_table_size(256);

        decoder
            .decode_block(&unhex("4109 6c6f 6361 6c68 6f73 74"))
            .unwrap();
        assert_eq!(1, decoder.dynamic_table().len());

        // 0x20 | 0: shrink the table to zero octets.
        decoder.decode_block(&[0x20]).unwrap();
        assert_eq!(0, decoder.dynamic_table().len());
        assert_eq!(0, decoder.dynamic_table().max_size());

        // Raising past the configured ceiling is a protocol error.
        assert!(matches!(
            decoder.decode_block(&unhex("3fe1 1f")),
            Err(DecodeError::SizeUpdateTooLarge(_))
        ));
    }

    #[test]
    fn index_zero_is_invalid() {
        let mut decoder = Decoder::new();
        assert!(matches!(
            decoder.decode_block(&[0x80]),
            Err(DecodeError::InvalidIndex(0))
        ));
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let mut decoder = Decoder::new();
        // Indexed field 62 with an empty dynamic table.
        assert!(matches!(
            decoder.decode_block(&[0xbe]),
            Err(DecodeError::InvalidIndex(62))
        ));
    }

    #[test]
    fn truncated_literal_is_rejected() {
        let mut decoder = Decoder::new();
        // Literal with incremental indexing, name index 1, value length 5,
        // but only two value bytes present.
        assert!(matches!(
            decoder.decode_block(&unhex("4105 6162")),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn never_indexed_literal_stays_out_of_the_table() {
        let mut decoder = Decoder::new();
        // 0x10: never indexed, literal name "password", value "secret".
        let headers = decoder
            .decode_block(&unhex("1008 7061 7373 776f 7264 0673 6563 7265 74"))
            .unwrap();
        assert_eq!(vec![("password", "secret")], pairs(&headers));
        assert!(decoder.dynamic_table().is_empty());
    }
}
