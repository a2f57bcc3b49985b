//! Content hashing: MD5 identity hashes, BLAKE3 block digests, and the
//! rolling checksum used for block matching.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// MD5 content hash, the identity an object store reports for an object.
///
/// Also used as the staging-artifact header that records which content
/// version an artifact was derived from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hash arbitrary bytes.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Hash a reader to exhaustion.
    ///
    /// # Errors
    /// Returns an error if reading fails.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut context = md5::Context::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            context.consume(&buffer[..n]);
        }
        Ok(Self(context.compute().0))
    }

    /// Hash a file by path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::from_reader(&mut file)
    }

    /// Construct from raw digest bytes.
    #[must_use]
    pub fn from_raw(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// BLAKE3 digest of a single content block (256-bit).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockDigest([u8; 32]);

impl BlockDigest {
    /// Hash a block of bytes.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "BlockDigest({})", hex.get(..16).unwrap_or(&hex))
    }
}

/// Rolling checksum for rsync-style block matching.
///
/// A variant of Adler-32 with a power-of-two modulus and a constant byte
/// offset, so removing the oldest byte of the window stays cheap. Rolling
/// one byte is O(1); a weak match is always confirmed with [`BlockDigest`].
#[derive(Clone, Copy)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window: u32,
}

fn f(x: u8) -> u32 {
    // The +31 offset distinguishes runs of zero bytes of different lengths.
    (u32::from(x) + 31) & 0xFF
}

impl RollingChecksum {
    /// Seed the checksum from a full window of bytes.
    #[must_use]
    pub fn new(block: &[u8]) -> Self {
        let mut a: u32 = 0;
        let mut b: u32 = 0;
        for &x in block {
            a = a.wrapping_add(f(x));
            b = b.wrapping_add(a);
        }
        Self {
            a,
            b,
            window: block.len() as u32,
        }
    }

    /// Slide the window one byte: remove `outgoing`, append `incoming`.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) {
        let out = f(outgoing);
        self.a = self.a.wrapping_sub(out);
        self.b = self.b.wrapping_sub(self.window.wrapping_mul(out));
        self.a = self.a.wrapping_add(f(incoming));
        self.b = self.b.wrapping_add(self.a);
    }

    /// Get the current weak hash value.
    #[must_use]
    pub fn value(&self) -> u32 {
        (self.b & 0xFFFF) << 16 | (self.a & 0xFFFF)
    }
}

/// Writer adapter that MD5-hashes everything written through it.
///
/// Used during reconstruction to verify output content without a second
/// read pass over the destination.
pub struct HashingWriter<W> {
    inner: W,
    context: md5::Context,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consume the adapter, returning the inner writer and the hash of
    /// everything written.
    pub fn finalize(self) -> (W, ContentHash) {
        (self.inner, ContentHash::from_raw(self.context.compute().0))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.context.consume(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_deterministic() {
        let h1 = ContentHash::from_bytes(b"hello world");
        let h2 = ContentHash::from_bytes(b"hello world");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::from_bytes(b"hello worlds"));
    }

    #[test]
    fn content_hash_reader_matches_bytes() {
        let data = b"some longer content that spans the read buffer".repeat(4096);
        let from_bytes = ContentHash::from_bytes(&data);
        let from_reader = ContentHash::from_reader(&mut data.as_slice()).unwrap();
        assert_eq!(from_bytes, from_reader);
    }

    #[test]
    fn content_hash_hex_is_32_chars() {
        let h = ContentHash::from_bytes(b"x");
        assert_eq!(h.to_hex().len(), 32);
    }

    #[test]
    fn rolling_matches_fresh_seed_at_every_offset() {
        let data: Vec<u8> = (0..512u32).map(|i| (i * 31 % 251) as u8).collect();
        let window = 64;

        let mut rolling = RollingChecksum::new(&data[..window]);
        for start in 1..=(data.len() - window) {
            rolling.roll(data[start - 1], data[start + window - 1]);
            let fresh = RollingChecksum::new(&data[start..start + window]);
            assert_eq!(rolling.value(), fresh.value(), "offset {start}");
        }
    }

    #[test]
    fn rolling_distinguishes_zero_runs() {
        let short = RollingChecksum::new(&[0u8; 16]);
        let long = RollingChecksum::new(&[0u8; 32]);
        assert_ne!(short.value(), long.value());
    }

    #[test]
    fn hashing_writer_matches_direct_hash() {
        let data = b"reconstructed content".repeat(1000);
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        let (inner, hash) = writer.finalize();
        assert_eq!(inner, data);
        assert_eq!(hash, ContentHash::from_bytes(&data));
    }
}
