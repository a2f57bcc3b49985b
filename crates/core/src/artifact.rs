//! Staging artifacts exchanged between the local driver and remote workers.
//!
//! Every checksum and instruction artifact starts with a raw 16-byte MD5
//! header naming the content version it was derived from. The header lets
//! workers skip regeneration when the artifact already matches the current
//! content, and lets the reconstruct phase verify its output.
//!
//! Records after the header are length-prefixed JSON: a big-endian `u32`
//! byte count followed by the serialized value.

use std::io::{self, BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{ChecksumBlock, Instruction};
use crate::error::{CoreError, Result};
use crate::hash::ContentHash;

/// Length of the raw MD5 header prefixing every artifact.
pub const MD5_HEADER_LEN: usize = 16;

/// Upper bound on a single record payload. A length prefix beyond this is
/// treated as corruption rather than an allocation request.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Object name of the checksum artifact for a file.
#[must_use]
pub fn checksum_artifact_name(name: &str) -> String {
    format!("{name}.checksum")
}

/// Object name of the instruction artifact for a file.
#[must_use]
pub fn instruction_artifact_name(name: &str) -> String {
    format!("{name}.instruction")
}

/// Object name of the reconstruction output before promotion.
#[must_use]
pub fn temp_object_name(name: &str) -> String {
    format!("{name}.updated")
}

/// Object name of the manifest for one pipeline run.
#[must_use]
pub fn manifest_name(run_id: &str) -> String {
    format!("{run_id}_files_to_sync.txt")
}

/// Write the MD5 header to the start of an artifact.
///
/// # Errors
/// Returns an error if the write fails.
pub fn write_md5_header<W: Write>(writer: &mut W, hash: &ContentHash) -> Result<()> {
    writer.write_all(hash.as_bytes())?;
    Ok(())
}

/// Read the MD5 header from the start of an artifact.
///
/// # Errors
/// Returns a decode error if fewer than 16 bytes are available.
pub fn read_md5_header<R: Read>(reader: &mut R) -> Result<ContentHash> {
    let mut bytes = [0u8; MD5_HEADER_LEN];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| CoreError::decode(format!("artifact header: {e}")))?;
    Ok(ContentHash::from_raw(bytes))
}

/// Check whether an artifact's header matches the expected content hash,
/// reading only the header bytes.
///
/// # Errors
/// Returns a decode error if the header cannot be read.
pub fn header_matches<R: Read>(reader: &mut R, expected: &ContentHash) -> Result<bool> {
    Ok(read_md5_header(reader)? == *expected)
}

/// Write one length-prefixed JSON record.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn write_record<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let payload =
        serde_json::to_vec(value).map_err(|e| CoreError::decode(format!("serialize record: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::decode("record exceeds u32 length prefix"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read one length-prefixed JSON record, or `None` at a clean end of
/// stream. A partial length prefix or truncated payload is a decode error.
///
/// # Errors
/// Returns a decode error on truncation, an oversized length prefix, or
/// malformed JSON.
pub fn read_record<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CoreError::decode("truncated record length prefix"));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_RECORD_LEN {
        return Err(CoreError::decode(format!(
            "record length {len} exceeds limit {MAX_RECORD_LEN}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CoreError::decode("truncated record payload")
        } else {
            CoreError::Io(e)
        }
    })?;

    let value = serde_json::from_slice(&payload)
        .map_err(|e| CoreError::decode(format!("malformed record: {e}")))?;
    Ok(Some(value))
}

/// Write a complete checksum artifact: MD5 header then one record per block.
///
/// # Errors
/// Returns an error if any write fails.
pub fn write_checksum_artifact<W: Write>(
    writer: &mut W,
    content_hash: &ContentHash,
    blocks: &[ChecksumBlock],
) -> Result<()> {
    write_md5_header(writer, content_hash)?;
    for block in blocks {
        write_record(writer, block)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a complete checksum artifact back.
///
/// # Errors
/// Returns a decode error if the artifact is truncated or malformed.
pub fn read_checksum_artifact<R: Read>(reader: &mut R) -> Result<(ContentHash, Vec<ChecksumBlock>)> {
    let hash = read_md5_header(reader)?;
    let mut blocks = Vec::new();
    while let Some(block) = read_record(reader)? {
        blocks.push(block);
    }
    Ok((hash, blocks))
}

/// Write a complete instruction artifact: MD5 header of the new content,
/// then one record per instruction.
///
/// # Errors
/// Returns an error if any write fails.
pub fn write_instruction_artifact<W: Write>(
    writer: &mut W,
    content_hash: &ContentHash,
    instructions: &[Instruction],
) -> Result<()> {
    write_md5_header(writer, content_hash)?;
    for instruction in instructions {
        write_record(writer, instruction)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a complete instruction artifact back.
///
/// # Errors
/// Returns a decode error if the artifact is truncated or malformed.
pub fn read_instruction_artifact<R: Read>(
    reader: &mut R,
) -> Result<(ContentHash, Vec<Instruction>)> {
    let hash = read_md5_header(reader)?;
    let mut instructions = Vec::new();
    while let Some(instruction) = read_record(reader)? {
        instructions.push(instruction);
    }
    Ok((hash, instructions))
}

/// Write a manifest: one object name per line.
///
/// # Errors
/// Returns an error if the write fails.
pub fn write_manifest<W: Write>(writer: &mut W, names: &[String]) -> Result<()> {
    for name in names {
        writer.write_all(name.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a manifest back, skipping blank lines.
///
/// # Errors
/// Returns a decode error if the manifest is not valid UTF-8.
pub fn read_manifest<R: BufRead>(reader: &mut R) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| CoreError::decode(format!("manifest: {e}")))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            names.push(trimmed.to_string());
        }
    }
    Ok(names)
}
