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

//! Static Huffman code for header string literals
//! [IETF RFC 7541 Appendix B](https://datatracker.ietf.org/doc/html/rfc7541#appendix-B)

use std::fmt::Display;
use std::sync::OnceLock;

/// Failures of Huffman decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    /// The bit stream does not land on a code boundary and the remainder is
    /// not a valid EOS-prefix padding.
    BadPadding,
    /// The explicit EOS symbol appeared inside the stream.
    UnexpectedEos,
}

impl Display for HuffmanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BadPadding => "huffman padding is not an EOS prefix",
            Self::UnexpectedEos => "EOS symbol inside huffman stream",
        })
    }
}

impl std::error::Error for HuffmanError {}

const EOS: usize = 256;

/// `(code, bit length)` for every octet plus the EOS symbol at index 256.
#[rustfmt::skip]
const CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

/// Encodes `input`, padding the final partial byte with the EOS prefix
/// (all-ones bits).
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for &byte in input {
        let (code, bits) = CODES[usize::from(byte)];
        acc = (acc << bits) | u64::from(code);
        acc_bits += u32::from(bits);

        while acc_bits >= 8 {
            acc_bits -= 8;
            output.push((acc >> acc_bits) as u8);
        }
    }

    if acc_bits > 0 {
        let pad = 8 - acc_bits;
        output.push(((acc << pad) as u8) | ((1u8 << pad) - 1));
    }

    output
}

// Binary decode tree over the code table, built once. Index 0 is the root;
// leaves carry the decoded symbol.
#[derive(Debug, Clone, Copy, Default)]
struct TreeNode {
    children: [Option<u16>; 2],
    symbol: Option<u16>,
}

fn decode_tree() -> &'static [TreeNode] {
    static TREE: OnceLock<Vec<TreeNode>> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![TreeNode::default()];
        for (symbol, &(code, bits)) in CODES.iter().enumerate() {
            let mut node = 0usize;
            for position in (0..bits).rev() {
                let bit = usize::from((code >> position) & 1 == 1);
                node = match nodes[node].children[bit] {
                    Some(next) => usize::from(next),
                    None => {
                        nodes.push(TreeNode::default());
                        let next = (nodes.len() - 1) as u16;
                        nodes[node].children[bit] = Some(next);
                        usize::from(next)
                    }
                };
            }
            nodes[node].symbol = Some(symbol as u16);
        }
        nodes
    })
}

/// Decodes a Huffman-coded string literal.
///
/// Trailing padding must be a strict prefix of the EOS code (at most seven
/// all-ones bits); anything else, or a full EOS inside the stream, rejects
/// the input.
pub fn decode(input: &[u8]) -> Result<Vec<u8>, HuffmanError> {
    let tree = decode_tree();
    let mut output = Vec::with_capacity(input.len() * 2);

    let mut node = 0usize;
    let mut pending_bits = 0u32;
    let mut pending_all_ones = true;

    for &byte in input {
        for position in (0..8).rev() {
            let bit = usize::from((byte >> position) & 1 == 1);

            pending_bits += 1;
            pending_all_ones &= bit == 1;
            if pending_bits > 7 {
                // A valid padding is shorter than a byte; a longer all-ones
                // run must resolve through the tree or fail below.
                pending_all_ones = false;
            }

            node = match tree[node].children[bit] {
                Some(next) => usize::from(next),
                None => return Err(HuffmanError::BadPadding),
            };

            if let Some(symbol) = tree[node].symbol {
                if usize::from(symbol) == EOS {
                    return Err(HuffmanError::UnexpectedEos);
                }
                output.push(symbol as u8);
                node = 0;
                pending_bits = 0;
                pending_all_ones = true;
            }
        }
    }

    if pending_bits == 0 || pending_all_ones {
        Ok(output)
    } else {
        Err(HuffmanError::BadPadding)
    }
}

#[cfg(test)]
mod test {
    use super::{decode, encode, HuffmanError};

    fn unhex(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    // Wire examples from RFC 7541 Appendix C.4 and C.6.
    const VECTORS: &[(&str, &str)] = &[
        ("www.example.com", "f1e3c2e5f23a6ba0ab90f4ff"),
        ("no-cache", "a8eb10649cbf"),
        ("custom-key", "25a849e95ba97d7f"),
        ("custom-value", "25a849e95bb8e8b4bf"),
        ("302", "6402"),
        ("private", "aec3771a4b"),
        (
            "Mon, 21 Oct 2013 20:13:21 GMT",
            "d07abe941054d444a8200595040b8166e082a62d1bff",
        ),
        ("https://www.example.com", "9d29ad171863c78f0b97c8e9ae82ae43d3"),
    ];

    #[test]
    fn rfc_vectors_encode() {
        for (text, hex) in VECTORS {
            assert_eq!(unhex(hex), encode(text.as_bytes()), "encoding {text:?}");
        }
    }

    #[test]
    fn rfc_vectors_decode() {
        for (text, hex) in VECTORS {
            assert_eq!(
                text.as_bytes(),
                decode(&unhex(hex)).unwrap().as_slice(),
                "decoding {hex}"
            );
        }
    }

    #[test]
    fn all_octets_round_trip() {
        let every_byte: Vec<u8> = (0u8..=255).collect();
        assert_eq!(every_byte, decode(&encode(&every_byte)).unwrap());
    }

    #[test]
    fn empty_string_round_trips() {
        assert!(encode(b"").is_empty());
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn zero_padding_is_rejected() {
        // '0' is code 00000; one coded zero plus three 0-bits of padding.
        assert_eq!(Err(HuffmanError::BadPadding), decode(&[0b0000_0000]));
    }

    #[test]
    fn whole_byte_of_padding_is_rejected() {
        let mut wire = encode(b"a");
        wire.push(0xff);
        assert_eq!(Err(HuffmanError::BadPadding), decode(&wire));
    }
}
