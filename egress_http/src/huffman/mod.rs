// Copyright (c) 2025 Huawei Device Co., Ltd.
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

//! [Huffman Code] implementation used by HPACK string literals.
//!
//! [Huffman Code]: https://www.rfc-editor.org/rfc/rfc7541.html#appendix-B
//!
//! The code table is the canonical Huffman code of RFC 7541 Appendix B,
//! generated from statistics over a large sample of HTTP headers. Entry 256
//! is the EOS symbol; its prefix pads the final byte of every encoded
//! string.

use std::sync::OnceLock;

use crate::h2::{ErrorCode, H2Error};

/// `(bits, code)` for each symbol 0..=255, plus EOS at 256.
const CODES: [(u8, u32); 257] = [
    (13, 0x1ff8),
    (23, 0x7fffd8),
    (28, 0xfffffe2),
    (28, 0xfffffe3),
    (28, 0xfffffe4),
    (28, 0xfffffe5),
    (28, 0xfffffe6),
    (28, 0xfffffe7),
    (28, 0xfffffe8),
    (24, 0xffffea),
    (30, 0x3ffffffc),
    (28, 0xfffffe9),
    (28, 0xfffffea),
    (30, 0x3ffffffd),
    (28, 0xfffffeb),
    (28, 0xfffffec),
    (28, 0xfffffed),
    (28, 0xfffffee),
    (28, 0xfffffef),
    (28, 0xffffff0),
    (28, 0xffffff1),
    (28, 0xffffff2),
    (30, 0x3ffffffe),
    (28, 0xffffff3),
    (28, 0xffffff4),
    (28, 0xffffff5),
    (28, 0xffffff6),
    (28, 0xffffff7),
    (28, 0xffffff8),
    (28, 0xffffff9),
    (28, 0xffffffa),
    (28, 0xffffffb),
    (6, 0x14),
    (10, 0x3f8),
    (10, 0x3f9),
    (12, 0xffa),
    (13, 0x1ff9),
    (6, 0x15),
    (8, 0xf8),
    (11, 0x7fa),
    (10, 0x3fa),
    (10, 0x3fb),
    (8, 0xf9),
    (11, 0x7fb),
    (8, 0xfa),
    (6, 0x16),
    (6, 0x17),
    (6, 0x18),
    (5, 0x0),
    (5, 0x1),
    (5, 0x2),
    (6, 0x19),
    (6, 0x1a),
    (6, 0x1b),
    (6, 0x1c),
    (6, 0x1d),
    (6, 0x1e),
    (6, 0x1f),
    (7, 0x5c),
    (8, 0xfb),
    (15, 0x7ffc),
    (6, 0x20),
    (12, 0xffb),
    (10, 0x3fc),
    (13, 0x1ffa),
    (6, 0x21),
    (7, 0x5d),
    (7, 0x5e),
    (7, 0x5f),
    (7, 0x60),
    (7, 0x61),
    (7, 0x62),
    (7, 0x63),
    (7, 0x64),
    (7, 0x65),
    (7, 0x66),
    (7, 0x67),
    (7, 0x68),
    (7, 0x69),
    (7, 0x6a),
    (7, 0x6b),
    (7, 0x6c),
    (7, 0x6d),
    (7, 0x6e),
    (7, 0x6f),
    (7, 0x70),
    (7, 0x71),
    (7, 0x72),
    (8, 0xfc),
    (7, 0x73),
    (8, 0xfd),
    (13, 0x1ffb),
    (19, 0x7fff0),
    (13, 0x1ffc),
    (14, 0x3ffc),
    (6, 0x22),
    (15, 0x7ffd),
    (5, 0x3),
    (6, 0x23),
    (5, 0x4),
    (6, 0x24),
    (5, 0x5),
    (6, 0x25),
    (6, 0x26),
    (6, 0x27),
    (5, 0x6),
    (7, 0x74),
    (7, 0x75),
    (6, 0x28),
    (6, 0x29),
    (6, 0x2a),
    (5, 0x7),
    (6, 0x2b),
    (7, 0x76),
    (6, 0x2c),
    (5, 0x8),
    (5, 0x9),
    (6, 0x2d),
    (7, 0x77),
    (7, 0x78),
    (7, 0x79),
    (7, 0x7a),
    (7, 0x7b),
    (15, 0x7ffe),
    (11, 0x7fc),
    (14, 0x3ffd),
    (13, 0x1ffd),
    (28, 0xffffffc),
    (20, 0xfffe6),
    (22, 0x3fffd2),
    (20, 0xfffe7),
    (20, 0xfffe8),
    (22, 0x3fffd3),
    (22, 0x3fffd4),
    (22, 0x3fffd5),
    (23, 0x7fffd9),
    (22, 0x3fffd6),
    (23, 0x7fffda),
    (23, 0x7fffdb),
    (23, 0x7fffdc),
    (23, 0x7fffdd),
    (23, 0x7fffde),
    (24, 0xffffeb),
    (23, 0x7fffdf),
    (24, 0xffffec),
    (24, 0xffffed),
    (22, 0x3fffd7),
    (23, 0x7fffe0),
    (24, 0xffffee),
    (23, 0x7fffe1),
    (23, 0x7fffe2),
    (23, 0x7fffe3),
    (23, 0x7fffe4),
    (21, 0x1fffdc),
    (22, 0x3fffd8),
    (23, 0x7fffe5),
    (22, 0x3fffd9),
    (23, 0x7fffe6),
    (23, 0x7fffe7),
    (24, 0xffffef),
    (22, 0x3fffda),
    (21, 0x1fffdd),
    (20, 0xfffe9),
    (22, 0x3fffdb),
    (22, 0x3fffdc),
    (23, 0x7fffe8),
    (23, 0x7fffe9),
    (21, 0x1fffde),
    (23, 0x7fffea),
    (22, 0x3fffdd),
    (22, 0x3fffde),
    (24, 0xfffff0),
    (21, 0x1fffdf),
    (22, 0x3fffdf),
    (23, 0x7fffeb),
    (23, 0x7fffec),
    (21, 0x1fffe0),
    (21, 0x1fffe1),
    (22, 0x3fffe0),
    (21, 0x1fffe2),
    (23, 0x7fffed),
    (22, 0x3fffe1),
    (23, 0x7fffee),
    (23, 0x7fffef),
    (20, 0xfffea),
    (22, 0x3fffe2),
    (22, 0x3fffe3),
    (22, 0x3fffe4),
    (23, 0x7ffff0),
    (22, 0x3fffe5),
    (22, 0x3fffe6),
    (23, 0x7ffff1),
    (26, 0x3ffffe0),
    (26, 0x3ffffe1),
    (20, 0xfffeb),
    (19, 0x7fff1),
    (22, 0x3fffe7),
    (23, 0x7ffff2),
    (22, 0x3fffe8),
    (25, 0x1ffffec),
    (26, 0x3ffffe2),
    (26, 0x3ffffe3),
    (26, 0x3ffffe4),
    (27, 0x7ffffde),
    (27, 0x7ffffdf),
    (26, 0x3ffffe5),
    (24, 0xfffff1),
    (25, 0x1ffffed),
    (19, 0x7fff2),
    (21, 0x1fffe3),
    (26, 0x3ffffe6),
    (27, 0x7ffffe0),
    (27, 0x7ffffe1),
    (26, 0x3ffffe7),
    (27, 0x7ffffe2),
    (24, 0xfffff2),
    (21, 0x1fffe4),
    (21, 0x1fffe5),
    (26, 0x3ffffe8),
    (26, 0x3ffffe9),
    (28, 0xffffffd),
    (27, 0x7ffffe3),
    (27, 0x7ffffe4),
    (27, 0x7ffffe5),
    (20, 0xfffec),
    (24, 0xfffff3),
    (20, 0xfffed),
    (21, 0x1fffe6),
    (22, 0x3fffe9),
    (21, 0x1fffe7),
    (21, 0x1fffe8),
    (23, 0x7ffff3),
    (22, 0x3fffea),
    (22, 0x3fffeb),
    (25, 0x1ffffee),
    (25, 0x1ffffef),
    (24, 0xfffff4),
    (24, 0xfffff5),
    (26, 0x3ffffea),
    (23, 0x7ffff4),
    (26, 0x3ffffeb),
    (27, 0x7ffffe6),
    (26, 0x3ffffec),
    (26, 0x3ffffed),
    (27, 0x7ffffe7),
    (27, 0x7ffffe8),
    (27, 0x7ffffe9),
    (27, 0x7ffffea),
    (27, 0x7ffffeb),
    (28, 0xffffffe),
    (27, 0x7ffffec),
    (27, 0x7ffffed),
    (27, 0x7ffffee),
    (27, 0x7ffffef),
    (27, 0x7fffff0),
    (26, 0x3ffffee),
    (30, 0x3fffffff),
];

const EOS: u16 = 256;

/// Returns the Huffman-encoded length of `src` in bytes.
pub(crate) fn huffman_encoded_len(src: &[u8]) -> usize {
    let bits: usize = src.iter().map(|b| CODES[*b as usize].0 as usize).sum();
    (bits + 7) / 8
}

/// Huffman-encodes `src` and appends the result to `dst`. The final byte is
/// padded with the most significant bits of the EOS symbol.
pub(crate) fn huffman_encode(src: &[u8], dst: &mut Vec<u8>) {
    let mut state: u64 = 0;
    let mut pending: u8 = 0;

    for byte in src {
        let (nbits, code) = CODES[*byte as usize];
        state = (state << nbits) | code as u64;
        pending += nbits;
        while pending >= 8 {
            pending -= 8;
            dst.push((state >> pending) as u8);
        }
    }

    if pending > 0 {
        state <<= 8 - pending;
        state |= (1 << (8 - pending)) - 1;
        dst.push(state as u8);
    }
}

/// A node of the decode tree. `0` child slots mean "absent" since the root
/// can never be a child.
#[derive(Clone, Copy)]
struct Node {
    children: [u16; 2],
    symbol: Option<u16>,
}

impl Node {
    const fn empty() -> Self {
        Node {
            children: [0, 0],
            symbol: None,
        }
    }
}

fn decode_tree() -> &'static [Node] {
    static TREE: OnceLock<Vec<Node>> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![Node::empty()];
        for (symbol, (nbits, code)) in CODES.iter().enumerate() {
            let mut idx = 0usize;
            for pos in (0..*nbits).rev() {
                let bit = ((code >> pos) & 1) as usize;
                if nodes[idx].children[bit] == 0 {
                    nodes.push(Node::empty());
                    let child = (nodes.len() - 1) as u16;
                    nodes[idx].children[bit] = child;
                }
                idx = nodes[idx].children[bit] as usize;
            }
            nodes[idx].symbol = Some(symbol as u16);
        }
        nodes
    })
}

/// Decodes a Huffman-encoded slice into raw bytes.
///
/// A decoded EOS symbol, or padding that is longer than seven bits or is not
/// the EOS prefix, is a compression error per RFC 7541 section 5.2.
pub(crate) fn huffman_decode(src: &[u8], dst: &mut Vec<u8>) -> Result<(), H2Error> {
    let tree = decode_tree();
    let mut idx = 0usize;
    let mut depth = 0u8;
    let mut all_ones = true;

    for byte in src {
        for pos in (0..8).rev() {
            let bit = ((byte >> pos) & 1) as usize;
            let child = tree[idx].children[bit];
            if child == 0 {
                return Err(H2Error::ConnectionError(ErrorCode::CompressionError));
            }
            idx = child as usize;
            depth += 1;
            all_ones &= bit == 1;
            if let Some(symbol) = tree[idx].symbol {
                if symbol == EOS {
                    return Err(H2Error::ConnectionError(ErrorCode::CompressionError));
                }
                dst.push(symbol as u8);
                idx = 0;
                depth = 0;
                all_ones = true;
            }
        }
    }

    // Incomplete trailing bits must be a prefix of EOS (all ones) and
    // shorter than a byte.
    if idx != 0 && (depth > 7 || !all_ones) {
        return Err(H2Error::ConnectionError(ErrorCode::CompressionError));
    }
    Ok(())
}

#[cfg(test)]
mod ut_huffman {
    use super::*;

    /// UT test cases for Huffman encoding against RFC 7541 Appendix C.
    ///
    /// # Brief
    /// 1. Encodes the example strings of RFC 7541 C.4 and C.6.
    /// 2. Checks the wire bytes match the RFC.
    #[test]
    fn ut_huffman_rfc7541_examples() {
        let mut dst = Vec::new();
        huffman_encode(b"www.example.com", &mut dst);
        assert_eq!(
            dst,
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );

        let mut dst = Vec::new();
        huffman_encode(b"no-cache", &mut dst);
        assert_eq!(dst, [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]);

        let mut dst = Vec::new();
        huffman_encode(b"302", &mut dst);
        assert_eq!(dst, [0x64, 0x02]);
    }

    /// UT test cases for Huffman round trips.
    ///
    /// # Brief
    /// 1. Encodes then decodes every byte value and assorted header strings.
    /// 2. Checks the decoded output equals the input.
    #[test]
    fn ut_huffman_roundtrip() {
        let mut inputs: Vec<Vec<u8>> = vec![
            b"".to_vec(),
            b"a".to_vec(),
            b"Mon, 21 Oct 2013 20:13:21 GMT".to_vec(),
            b"text/plain;charset=UTF-8".to_vec(),
        ];
        inputs.push((0u8..=255).collect());

        for input in inputs {
            let mut encoded = Vec::new();
            huffman_encode(&input, &mut encoded);
            assert_eq!(huffman_encoded_len(&input), encoded.len());
            let mut decoded = Vec::new();
            huffman_decode(&encoded, &mut decoded).unwrap();
            assert_eq!(input, decoded);
        }
    }

    /// UT test cases for invalid Huffman padding.
    ///
    /// # Brief
    /// 1. Decodes a sequence whose padding is zero bits rather than the EOS
    ///    prefix.
    /// 2. Checks the decoder reports a compression error.
    #[test]
    fn ut_huffman_bad_padding() {
        // '0' is 5 bits (00000); the remaining 3 bits are zeros, not EOS.
        let mut decoded = Vec::new();
        assert!(huffman_decode(&[0x00], &mut decoded).is_err());
    }
}
