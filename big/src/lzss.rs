//! The fixed-window LZSS variant used to compress individual members of
//! HW1-family archives: a 12-bit window index, a 4-bit length, and a
//! binary-tree suffix index over the sliding window driving the encoder's
//! longest-match search.

use std::io::{Read, Result, Write};

use crate::bitio::{BitReader, BitWriter};

const INDEX_BIT_COUNT: u32 = 12;
const LENGTH_BIT_COUNT: u32 = 4;
const WINDOW_SIZE: usize = 1 << INDEX_BIT_COUNT; // 4096
const RAW_LOOK_AHEAD_SIZE: usize = 1 << LENGTH_BIT_COUNT; // 16
const BREAK_EVEN: usize = (1 + INDEX_BIT_COUNT as usize + LENGTH_BIT_COUNT as usize) / 9; // 1
const LOOK_AHEAD_SIZE: usize = RAW_LOOK_AHEAD_SIZE + BREAK_EVEN; // 17
const TREE_ROOT: usize = WINDOW_SIZE;
const END_OF_STREAM: usize = 0x000;
const UNUSED: usize = 0;

/// The ratio gate callers apply around a single compressed member: below
/// this, the compressed form is kept; at or above it, the member is stored
/// raw instead.
pub const MIN_COMPRESSION_RATIO: f64 = 0.95;

fn mod_window(v: usize) -> usize {
    v & (WINDOW_SIZE - 1)
}

#[derive(Clone, Copy, Default)]
struct Node {
    parent: usize,
    smaller_child: usize,
    larger_child: usize,
}

struct Tree {
    nodes: Vec<Node>,
    window: [u8; WINDOW_SIZE],
}

impl Tree {
    fn new(root_idx: usize, window: [u8; WINDOW_SIZE]) -> Self {
        let mut nodes = vec![Node::default(); WINDOW_SIZE + 1];
        nodes[TREE_ROOT].larger_child = root_idx;
        nodes[root_idx] = Node {
            parent: TREE_ROOT,
            smaller_child: UNUSED,
            larger_child: UNUSED,
        };
        Tree { nodes, window }
    }

    fn contract_node(&mut self, old_node: usize, new_node: usize) {
        self.nodes[new_node].parent = self.nodes[old_node].parent;
        let parent = self.nodes[old_node].parent;
        if self.nodes[parent].larger_child == old_node {
            self.nodes[parent].larger_child = new_node;
        } else {
            self.nodes[parent].smaller_child = new_node;
        }
        self.nodes[old_node].parent = UNUSED;
    }

    fn replace_node(&mut self, old_node: usize, new_node: usize) {
        let parent = self.nodes[old_node].parent;
        if self.nodes[parent].smaller_child == old_node {
            self.nodes[parent].smaller_child = new_node;
        } else {
            self.nodes[parent].larger_child = new_node;
        }
        self.nodes[new_node] = self.nodes[old_node];
        let smaller_child = self.nodes[new_node].smaller_child;
        let larger_child = self.nodes[new_node].larger_child;
        self.nodes[smaller_child].parent = new_node;
        self.nodes[larger_child].parent = new_node;
        self.nodes[old_node].parent = UNUSED;
    }

    fn find_next_node(&self, node: usize) -> usize {
        let mut next = self.nodes[node].smaller_child;
        while self.nodes[next].larger_child != UNUSED {
            next = self.nodes[next].larger_child;
        }
        next
    }

    fn delete_string(&mut self, p: usize) {
        if self.nodes[p].parent == UNUSED {
            return;
        }
        if self.nodes[p].larger_child == UNUSED {
            let smaller = self.nodes[p].smaller_child;
            self.contract_node(p, smaller);
        } else if self.nodes[p].smaller_child == UNUSED {
            let larger = self.nodes[p].larger_child;
            self.contract_node(p, larger);
        } else {
            let replacement = self.find_next_node(p);
            self.delete_string(replacement);
            self.replace_node(p, replacement);
        }
    }

    fn add_string(&mut self, new_node: usize, mut match_position: usize) -> (usize, usize) {
        if new_node == END_OF_STREAM {
            return (0, match_position);
        }

        let mut test_node = self.nodes[TREE_ROOT].larger_child;
        let mut match_length = 0usize;

        loop {
            let mut i = 0usize;
            let mut delta = 0i32;
            for ii in 0..LOOK_AHEAD_SIZE {
                delta = self.window[mod_window(new_node + ii)] as i32
                    - self.window[mod_window(test_node + ii)] as i32;
                i = ii;
                if delta != 0 {
                    break;
                }
            }

            if i >= match_length {
                match_length = i;
                match_position = test_node;
                if match_length >= LOOK_AHEAD_SIZE {
                    self.replace_node(test_node, new_node);
                    return (match_length, match_position);
                }
            }

            let going_larger = delta >= 0;
            let child = if going_larger {
                self.nodes[test_node].larger_child
            } else {
                self.nodes[test_node].smaller_child
            };
            if child == UNUSED {
                if going_larger {
                    self.nodes[test_node].larger_child = new_node;
                } else {
                    self.nodes[test_node].smaller_child = new_node;
                }
                self.nodes[new_node] = Node {
                    parent: test_node,
                    smaller_child: UNUSED,
                    larger_child: UNUSED,
                };
                return (match_length, match_position);
            }
            test_node = child;
        }
    }
}

/// Compresses `input` into the LZSS tagged-token bit stream, writing it to
/// `output`. Returns the number of bytes written.
pub fn compress<R: Read, W: Write>(mut input: R, output: W) -> Result<u64> {
    let mut window = [0u8; WINDOW_SIZE];
    let mut current_position = 1usize;

    let mut look_ahead_bytes = 0usize;
    let mut byte = [0u8; 1];
    for i in 0..LOOK_AHEAD_SIZE {
        if input.read(&mut byte)? == 0 {
            break;
        }
        window[current_position + i] = byte[0];
        look_ahead_bytes = i + 1;
    }

    let mut match_length = 0usize;
    let mut match_position = 0usize;
    let mut bit_writer = BitWriter::new(output);

    // The window lives inside `tree` (read by `add_string`, written below as
    // new bytes slide in) so the two are never borrowed against each other.
    let mut tree = Tree::new(current_position, window);

    while look_ahead_bytes > 0 {
        if match_length > look_ahead_bytes {
            match_length = look_ahead_bytes;
        }

        let replace_count;
        if match_length <= BREAK_EVEN {
            replace_count = 1;
            bit_writer.write_bits(1, 1)?;
            bit_writer.write_bits(tree.window[current_position] as u32, 8)?;
        } else {
            bit_writer.write_bits(0, 1)?;
            bit_writer.write_bits(match_position as u32, INDEX_BIT_COUNT)?;
            bit_writer.write_bits((match_length - (BREAK_EVEN + 1)) as u32, LENGTH_BIT_COUNT)?;
            replace_count = match_length;
        }

        for _ in 0..replace_count {
            tree.delete_string(mod_window(current_position + LOOK_AHEAD_SIZE));

            if input.read(&mut byte)? == 0 {
                look_ahead_bytes -= 1;
            } else {
                tree.window[mod_window(current_position + LOOK_AHEAD_SIZE)] = byte[0];
            }

            current_position = mod_window(current_position + 1);
            if look_ahead_bytes > 0 {
                let (ml, mp) = tree.add_string(current_position, match_position);
                match_length = ml;
                match_position = mp;
            }
        }
    }

    bit_writer.write_bits(0, 1)?;
    bit_writer.write_bits(END_OF_STREAM as u32, INDEX_BIT_COUNT)?;
    bit_writer.flush()?;
    Ok(bit_writer.bytes_written())
}

/// Decompresses an LZSS bit stream from `input`, writing the recovered
/// bytes to `output`. Returns the number of bytes written.
pub fn decompress<R: Read, W: Write>(input: R, mut output: W) -> Result<u64> {
    let mut window = [0u8; WINDOW_SIZE];
    let mut current_position = 1usize;
    let mut bit_reader = BitReader::new(input);
    let mut written = 0u64;

    loop {
        let pass_through = bit_reader.read_bits(1)? != 0;
        if pass_through {
            let c = bit_reader.read_bits(8)? as u8;
            output.write_all(&[c])?;
            written += 1;
            window[current_position] = c;
            current_position = mod_window(current_position + 1);
        } else {
            let match_position = bit_reader.read_bits(INDEX_BIT_COUNT)? as usize;
            if match_position == END_OF_STREAM {
                break;
            }
            let match_length = bit_reader.read_bits(LENGTH_BIT_COUNT)? as usize + BREAK_EVEN;

            for i in 0..=match_length {
                let c = window[mod_window(match_position + i)];
                output.write_all(&[c])?;
                written += 1;
                window[current_position] = c;
                current_position = mod_window(current_position + 1);
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(data: &[u8]) -> Vec<u8> {
        let mut compressed = Cursor::new(Vec::new());
        compress(Cursor::new(data.to_vec()), &mut compressed).unwrap();
        let mut decompressed = Cursor::new(Vec::new());
        decompress(Cursor::new(compressed.into_inner()), &mut decompressed).unwrap();
        decompressed.into_inner()
    }

    #[test]
    fn s2_literal_only_stream() {
        let mut compressed = Cursor::new(Vec::new());
        compress(Cursor::new(b"A".to_vec()), &mut compressed).unwrap();
        let bytes = compressed.into_inner();
        // tag(1) | 0x41 | tag(0) | index(12)=0  => bits: 1 0100 0001 0 000000000000
        // packed MSB-first into bytes: 1010 0000 1000 0000 0000 (padded)
        assert_eq!(bytes, vec![0b1010_0000, 0b1000_0000, 0b0000_0000]);

        let mut out = Cursor::new(Vec::new());
        decompress(Cursor::new(bytes), &mut out).unwrap();
        assert_eq!(out.into_inner(), b"A");
    }

    #[test]
    fn round_trip_empty() {
        assert_eq!(round_trip(b""), b"");
    }

    #[test]
    fn round_trip_repetitive() {
        let data = b"abababababababababababababababababab".to_vec();
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn round_trip_pseudo_random_sizes() {
        // Deterministic LCG, avoids pulling in an external randomness crate
        // purely for test data generation.
        let mut state: u64 = 0x1234_5678_9abc_def0;
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 32) as u32
        };

        for len in [0usize, 1, 2, 17, 100, 4096, 8192, 20000] {
            let data: Vec<u8> = (0..len).map(|_| next() as u8).collect();
            assert_eq!(round_trip(&data), data, "len={}", len);
        }
    }

    #[test]
    fn round_trip_all_same_byte_longer_than_window() {
        let data = vec![0x42u8; 9000];
        assert_eq!(round_trip(&data), data);
    }
}
