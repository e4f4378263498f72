//! # strand-digest
//!
//! A self-contained SHA-1 implementation with the ordinary
//! init / update / finalize shape and the standard 20-byte output.
//!
//! This exists for the protocol-handshake path of the layers above (the
//! WebSocket accept key is a SHA-1 of the client nonce and a fixed GUID);
//! it is bundled so the containers ship with no cryptography dependency.
//! SHA-1 is not collision-resistant and must not be used for anything
//! security-sensitive beyond that legacy handshake role.
//!
//! ## Example
//!
//! ```
//! use strand_digest::{Sha1, digest};
//!
//! let mut hasher = Sha1::new();
//! hasher.update(b"ab");
//! hasher.update(b"c");
//! let streamed = hasher.finalize();
//!
//! assert_eq!(streamed, digest(b"abc"));
//! assert_eq!(streamed[..4], [0xa9, 0x99, 0x3e, 0x36]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Length of a SHA-1 digest in bytes.
pub const DIGEST_LEN: usize = 20;

const BLOCK_LEN: usize = 64;

/// Streaming SHA-1 state.
///
/// Feed bytes with [`update`](Sha1::update) in any chunking, then consume
/// the state with [`finalize`](Sha1::finalize).
#[derive(Clone)]
pub struct Sha1 {
    state: [u32; 5],
    block: [u8; BLOCK_LEN],
    block_len: usize,
    /// Total bytes fed so far; the padding trailer records this in bits.
    message_len: u64,
}

impl Sha1 {
    /// Creates a hasher in the standard initial state.
    pub fn new() -> Self {
        Self {
            state: [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0],
            block: [0; BLOCK_LEN],
            block_len: 0,
            message_len: 0,
        }
    }

    /// Feeds bytes into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut input = bytes;
        self.message_len = self.message_len.wrapping_add(input.len() as u64);

        if self.block_len > 0 {
            let take = (BLOCK_LEN - self.block_len).min(input.len());
            self.block[self.block_len..self.block_len + take].copy_from_slice(&input[..take]);
            self.block_len += take;
            input = &input[take..];
            if self.block_len == BLOCK_LEN {
                let block = self.block;
                Self::compress(&mut self.state, &block);
                self.block_len = 0;
            }
        }

        let mut chunks = input.chunks_exact(BLOCK_LEN);
        for chunk in chunks.by_ref() {
            Self::compress(&mut self.state, chunk.try_into().unwrap());
        }
        let rest = chunks.remainder();
        self.block[..rest.len()].copy_from_slice(rest);
        self.block_len = rest.len();
    }

    /// Pads, appends the bit length, and returns the digest.
    pub fn finalize(mut self) -> [u8; DIGEST_LEN] {
        let bit_len = self.message_len.wrapping_mul(8);

        let mut block = [0u8; BLOCK_LEN];
        block[..self.block_len].copy_from_slice(&self.block[..self.block_len]);
        block[self.block_len] = 0x80;
        if self.block_len >= BLOCK_LEN - 8 {
            // no room for the length trailer; it gets a block of its own
            Self::compress(&mut self.state, &block);
            block = [0u8; BLOCK_LEN];
        }
        block[BLOCK_LEN - 8..].copy_from_slice(&bit_len.to_be_bytes());
        Self::compress(&mut self.state, &block);

        let mut out = [0u8; DIGEST_LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.state) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    fn compress(state: &mut [u32; 5], block: &[u8; BLOCK_LEN]) {
        let mut schedule = [0u32; 80];
        for (i, word) in block.chunks_exact(4).enumerate() {
            schedule[i] = u32::from_be_bytes(word.try_into().unwrap());
        }
        for i in 16..80 {
            schedule[i] = (schedule[i - 3] ^ schedule[i - 8] ^ schedule[i - 14]
                ^ schedule[i - 16])
                .rotate_left(1);
        }

        let [mut a, mut b, mut c, mut d, mut e] = *state;
        for (i, word) in schedule.into_iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | (!b & d), 0x5A82_7999),
                20..=39 => (b ^ c ^ d, 0x6ED9_EBA1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC),
                _ => (b ^ c ^ d, 0xCA62_C1D6),
            };
            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(word);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        state[0] = state[0].wrapping_add(a);
        state[1] = state[1].wrapping_add(b);
        state[2] = state[2].wrapping_add(c);
        state[3] = state[3].wrapping_add(d);
        state[4] = state[4].wrapping_add(e);
    }
}

impl Default for Sha1 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha1")
            .field("message_len", &self.message_len)
            .finish_non_exhaustive()
    }
}

/// One-shot digest of a byte slice.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn empty_input() {
        assert_eq!(hex(&digest(b"")), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn abc() {
        assert_eq!(hex(&digest(b"abc")), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn two_block_message() {
        let input = b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq";
        assert_eq!(hex(&digest(input)), "84983e441c3bd26ebaae4aa1f95129e5e54670f1");
    }

    #[test]
    fn quick_brown_fox() {
        assert_eq!(
            hex(&digest(b"The quick brown fox jumps over the lazy dog")),
            "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12"
        );
    }

    #[test]
    fn handshake_accept_key_input() {
        // RFC 6455 §1.3: client nonce concatenated with the fixed GUID
        let input = b"dGhlIHNhbXBsZSBub25jZQ==258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
        assert_eq!(hex(&digest(input)), "b37a4f2cc0624f1690f64606cf385945b2bec4ea");
    }

    #[test]
    fn million_a() {
        let mut hasher = Sha1::new();
        let chunk = [b'a'; 1_000];
        for _ in 0..1_000 {
            hasher.update(&chunk);
        }
        assert_eq!(
            hex(&hasher.finalize()),
            "34aa973cd4c4daa4f61eeb2bdbad27316534016f"
        );
    }

    #[test]
    fn chunking_is_irrelevant() {
        let input: Vec<u8> = (0u8..=255).cycle().take(1_337).collect();
        let one_shot = digest(&input);

        for split in [1usize, 7, 63, 64, 65, 511] {
            let mut hasher = Sha1::new();
            for chunk in input.chunks(split) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.finalize(), one_shot, "split {split}");
        }
    }

    #[test]
    fn padding_boundaries() {
        // lengths that straddle the 55/56-byte trailer boundary
        let known = [
            (55usize, "c1c8bbdc22796e28c0e15163d20899b65621d65a"),
            (56usize, "c2db330f6083854c99d4b5bfb6e8f29f201be699"),
            (64usize, "0098ba824b5c16427bd7a1122a5a442a25ec644d"),
        ];
        for (len, expected) in known {
            let input = vec![b'a'; len];
            assert_eq!(hex(&digest(&input)), expected, "len {len}");
        }
    }
}
