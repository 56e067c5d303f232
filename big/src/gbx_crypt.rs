//! Gearbox key derivation and the position-dependent additive-byte stream
//! cipher used to wrap the body of HWRM archives.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{BigError, Result};

/// `0xDEADBE7A`: the marker HWRM expects at the start of the footer.
pub const ENCRYPTION_KEY_MARKER: u32 = 0xDEAD_BE7A;
pub const ENCRYPTION_KEY_MAX_SIZE: usize = 1024;

pub(crate) fn rotl32(v: u32, bits: u32) -> u32 {
    v.rotate_left(bits)
}

pub(crate) fn split_to_bytes(v: u32) -> [u8; 4] {
    [
        (v & 0xFF) as u8,
        ((v >> 8) & 0xFF) as u8,
        ((v >> 16) & 0xFF) as u8,
        ((v >> 24) & 0xFF) as u8,
    ]
}

pub(crate) fn combine_bytes(bytes: &[u8]) -> u32 {
    (bytes[0] as u32) | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16) | ((bytes[3] as u32) << 24)
}

/// Derives the combined cipher key from a per-archive `local_key` and a
/// fixed per-format `master_key`, both treated as little-endian u32 words.
fn combine_keys(local_key: &[u8], master_key: &[u8], data_size: u32) -> Vec<u8> {
    let key_size = local_key.len();
    let local_words: Vec<u32> = local_key.chunks(4).map(combine_bytes).collect();
    let master_words: Vec<u32> = master_key.chunks(4).map(combine_bytes).collect();

    let mut combined = vec![0u8; key_size];
    let mut w = 0usize;
    while w < key_size {
        let mut c = local_words[w / 4];
        for b in 0..4 {
            let t = rotl32(c.wrapping_add(data_size), 8);
            let t_bytes = split_to_bytes(t);
            for j in 0..4 {
                let idx = ((c ^ (t_bytes[j] as u32)) & 0xFF) as usize;
                c = master_words[idx] ^ (c >> 8);
            }
            combined[w + b] = (c & 0xFF) as u8;
        }
        w += 4;
    }
    combined
}

/// Derived per-archive cipher: a simple additive stream cipher keyed by
/// `combined[(offset + i) % key_size]`, only ever applied to bytes below
/// `data_size`.
pub struct GearboxCipher {
    data_size: u64,
    key: Vec<u8>,
}

impl GearboxCipher {
    pub fn new(local_key: &[u8], master_key: &[u8], data_size: u64) -> Self {
        let key = combine_keys(local_key, master_key, data_size as u32);
        GearboxCipher { data_size, key }
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    fn key_byte(&self, pos: u64) -> u8 {
        self.key[(pos % self.key.len() as u64) as usize]
    }

    pub fn decrypt(&self, cipher: &[u8], offset: u64) -> Vec<u8> {
        cipher
            .iter()
            .enumerate()
            .map(|(i, &c)| c.wrapping_add(self.key_byte(offset + i as u64)))
            .collect()
    }

    pub fn encrypt(&self, plain: &[u8], offset: u64) -> Vec<u8> {
        plain
            .iter()
            .enumerate()
            .map(|(i, &p)| p.wrapping_sub(self.key_byte(offset + i as u64)))
            .collect()
    }

    /// Reads `size` plaintext bytes from `reader`, which must be positioned
    /// at an absolute file offset `< data_size`. Rejects reads that would
    /// cross the `data_size` boundary, matching the read discipline callers
    /// are expected to uphold (issue two reads instead).
    pub fn read_decrypted<R: Read + Seek>(&self, mut reader: R, size: u64) -> Result<Vec<u8>> {
        let pos = reader.stream_position()?;
        if pos + size > self.data_size {
            return Err(BigError::encryption(
                "attempted to read past end of encryption",
            ));
        }
        let mut buf = vec![0u8; size as usize];
        reader.read_exact(&mut buf)?;
        Ok(self.decrypt(&buf, pos))
    }
}

/// Parsed footer: the cipher plus the absolute offset at which the
/// encrypted body ends (`data_size`).
pub struct Footer {
    pub cipher: GearboxCipher,
}

/// Parses the Gearbox footer from the tail of `reader` per §4.D: a
/// `marker_offset` at EOF-4, a `marker` (must equal `key_marker`), a
/// `key_byte_count`, and that many bytes of local key.
pub fn load_footer<R: Read + Seek>(mut reader: R, master_key: &[u8], key_marker: u32) -> Result<Footer> {
    reader.seek(SeekFrom::End(-4))?;
    let last_int_loc = reader.stream_position()?;
    let marker_offset = read_u32_le(&mut reader)?;

    if (marker_offset as u64) >= last_int_loc.saturating_sub(6) {
        return Err(BigError::encryption(format!(
            "invalid marker offset: {}",
            marker_offset
        )));
    }

    reader.seek(SeekFrom::Current(-(marker_offset as i64)))?;
    let data_size = reader.stream_position()?;

    let marker = read_u32_le(&mut reader)?;
    if marker != key_marker {
        return Err(BigError::encryption(format!(
            "unexpected marker value: 0x{:08X} should be 0x{:08X}",
            marker, key_marker
        )));
    }

    let key_byte_count = read_u16_le(&mut reader)? as usize;
    if key_byte_count > ENCRYPTION_KEY_MAX_SIZE {
        return Err(BigError::encryption(format!(
            "invalid encryption key size: {} > {}",
            key_byte_count, ENCRYPTION_KEY_MAX_SIZE
        )));
    }

    let mut local_key = vec![0u8; key_byte_count];
    reader.read_exact(&mut local_key)?;

    Ok(Footer {
        cipher: GearboxCipher::new(&local_key, master_key, data_size),
    })
}

fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16_le<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_master_key() -> Vec<u8> {
        (0..1024u32).map(|i| (i.wrapping_mul(2654435761)) as u8).collect()
    }

    #[test]
    fn integer_helpers() {
        assert_eq!(rotl32(0xFFFF_FFFF, 8), 0xFFFF_FFFF);
        assert_eq!(split_to_bytes(0x1122_3344), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(combine_bytes(&[0x44, 0x33, 0x22, 0x11]), 0x1122_3344);
        assert_eq!((0xFF_FFFF_FFFFu64 & 0xFFFF_FFFF) as u32, 0xFFFF_FFFF);
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let master = fixed_master_key();
        let local = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let a = combine_keys(&local, &master, 1234);
        let b = combine_keys(&local, &master, 1234);
        assert_eq!(a, b);
        assert_eq!(a.len(), local.len());
    }

    #[test]
    fn cipher_round_trip() {
        let master = fixed_master_key();
        let local = vec![9u8, 8, 7, 6, 5, 4, 3, 2, 1, 0, 11, 22];
        let cipher = GearboxCipher::new(&local, &master, 4096);
        let plain = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit.".to_vec();

        let ct = cipher.encrypt(&plain, 0);
        let pt = cipher.decrypt(&ct, 0);
        assert_eq!(pt, plain);

        let k = plain.len() / 2;
        let partial = cipher.decrypt(&ct[k..k + 25], k as u64);
        assert_eq!(partial, plain[k..k + 25]);
    }

    #[test]
    fn partial_cipher_matches_whole() {
        let master = fixed_master_key();
        let local = vec![42u8; 16];
        let cipher = GearboxCipher::new(&local, &master, 10_000);
        let data = (0..500u32).map(|i| i as u8).collect::<Vec<u8>>();
        let (a, b) = data.split_at(200);

        let whole_ct = cipher.encrypt(&data, 0);
        let a_ct = cipher.encrypt(a, 0);
        let b_ct = cipher.encrypt(b, a.len() as u64);

        let whole_pt = cipher.decrypt(&whole_ct, 0);
        let mut split_pt = cipher.decrypt(&a_ct, 0);
        split_pt.extend(cipher.decrypt(&b_ct, a.len() as u64));

        assert_eq!(whole_pt, split_pt);
        assert_eq!(whole_pt, data);
    }
}
