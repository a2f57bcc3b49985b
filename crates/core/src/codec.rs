//! Delta codec: block checksum generation, diff computation against those
//! checksums, and reconstruction from instructions plus base content.
//!
//! This is the rsync algorithm shape: the side holding the old content
//! publishes per-block checksums, the side holding the new content slides a
//! window over it matching blocks by weak rolling hash confirmed with a
//! strong digest, and emits copy/literal instructions that rebuild the new
//! content from the old.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::{BlockDigest, RollingChecksum};

/// Default block size for checksum generation.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Maximum bytes carried by a single literal instruction. Longer literal
/// runs are split so no single record dominates the artifact framing.
pub const MAX_LITERAL_LEN: usize = 1 << 20;

/// Checksums for one block of destination content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumBlock {
    /// Position of the block in the destination, counted from zero.
    pub index: u64,
    /// Byte offset of the block in the destination.
    pub offset: u64,
    /// Block length in bytes. Only the final block may be short.
    pub length: u32,
    /// Weak rolling hash of the block.
    pub weak: u32,
    /// Strong digest confirming a weak match.
    pub strong: BlockDigest,
}

/// One step of a reconstruction recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Copy a byte range from the existing destination content.
    Copy { offset: u64, length: u32 },
    /// Write bytes carried verbatim from the source.
    Literal { data: Bytes },
}

/// Encoder/decoder for delta sync over fixed-size blocks.
#[derive(Debug, Clone, Copy)]
pub struct DeltaCodec {
    block_size: u32,
}

impl Default for DeltaCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl DeltaCodec {
    /// Create a codec with the given block size. Sizes below 64 bytes are
    /// clamped up; tiny windows make weak-hash collisions dominate.
    #[must_use]
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size.max(64),
        }
    }

    /// Block size this codec generates checksums at.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Compute per-block checksums of existing content.
    #[must_use]
    pub fn generate_checksums(&self, content: &[u8]) -> Vec<ChecksumBlock> {
        let mut blocks = Vec::with_capacity(content.len() / self.block_size as usize + 1);
        let mut offset = 0u64;
        for (index, chunk) in content.chunks(self.block_size as usize).enumerate() {
            blocks.push(ChecksumBlock {
                index: index as u64,
                offset,
                length: chunk.len() as u32,
                weak: RollingChecksum::new(chunk).value(),
                strong: BlockDigest::from_bytes(chunk),
            });
            offset += chunk.len() as u64;
        }
        blocks
    }

    /// Diff new content against checksums of the old content, producing
    /// instructions that rebuild the new content from the old.
    ///
    /// The block size is taken from the checksums themselves so the two
    /// sides need not agree on configuration out of band.
    #[must_use]
    pub fn diff(&self, new: &[u8], base: &[ChecksumBlock]) -> Vec<Instruction> {
        let block_size = base
            .first()
            .map_or(self.block_size as usize, |b| b.length as usize);

        let mut by_weak: HashMap<u32, Vec<&ChecksumBlock>> = HashMap::new();
        for block in base {
            by_weak.entry(block.weak).or_default().push(block);
        }

        let mut instructions = Vec::new();
        let mut literal_start = 0usize;
        let mut pos = 0usize;
        let mut rolling: Option<RollingChecksum> = None;

        while pos + block_size <= new.len() {
            let window = &new[pos..pos + block_size];
            let weak = match &mut rolling {
                Some(r) => {
                    r.roll(new[pos - 1], new[pos + block_size - 1]);
                    r.value()
                }
                None => {
                    let r = RollingChecksum::new(window);
                    let value = r.value();
                    rolling = Some(r);
                    value
                }
            };

            let matched = by_weak.get(&weak).and_then(|candidates| {
                let strong = BlockDigest::from_bytes(window);
                candidates
                    .iter()
                    .find(|b| b.length as usize == block_size && b.strong == strong)
            });

            if let Some(block) = matched {
                flush_literal(&mut instructions, &new[literal_start..pos]);
                instructions.push(Instruction::Copy {
                    offset: block.offset,
                    length: block.length,
                });
                pos += block_size;
                literal_start = pos;
                rolling = None;
            } else {
                pos += 1;
            }
        }

        // The final base block may be shorter than the block size; give the
        // remaining tail one chance to match it before falling back to a
        // literal.
        let tail = &new[literal_start..];
        let tail_match = base.last().and_then(|last| {
            if last.length as usize == tail.len()
                && (last.length as usize) < block_size
                && RollingChecksum::new(tail).value() == last.weak
                && BlockDigest::from_bytes(tail) == last.strong
            {
                Some(last)
            } else {
                None
            }
        });

        match tail_match {
            Some(block) => instructions.push(Instruction::Copy {
                offset: block.offset,
                length: block.length,
            }),
            None => flush_literal(&mut instructions, tail),
        }

        instructions
    }

    /// Rebuild content by applying instructions against a seekable reader
    /// over the old content, writing the result to `out`.
    ///
    /// # Errors
    /// Returns an error if a copy range extends past the end of the base
    /// content or if any read/write fails.
    pub fn reconstruct<R, W>(&self, base: &mut R, instructions: &[Instruction], out: &mut W) -> Result<u64>
    where
        R: Read + Seek,
        W: Write,
    {
        let mut total = 0u64;
        for instruction in instructions {
            match instruction {
                Instruction::Copy { offset, length } => {
                    base.seek(SeekFrom::Start(*offset))?;
                    let copied = io::copy(&mut base.by_ref().take(u64::from(*length)), out)?;
                    if copied != u64::from(*length) {
                        return Err(CoreError::decode(format!(
                            "copy instruction at offset {offset} wants {length} bytes, base had {copied}"
                        )));
                    }
                    total += copied;
                }
                Instruction::Literal { data } => {
                    out.write_all(data)?;
                    total += data.len() as u64;
                }
            }
        }
        out.flush()?;
        Ok(total)
    }
}

fn flush_literal(instructions: &mut Vec<Instruction>, pending: &[u8]) {
    for chunk in pending.chunks(MAX_LITERAL_LEN) {
        if !chunk.is_empty() {
            instructions.push(Instruction::Literal {
                data: Bytes::copy_from_slice(chunk),
            });
        }
    }
}
