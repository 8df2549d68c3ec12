//! Delta scripts and the matcher that produces them
//!
//! A window of `block_size` bytes slides over the target. Each position's
//! weak checksum is looked up in the signature; candidates are confirmed by
//! strong checksum. A confirmed match emits a copy and skips the whole block;
//! otherwise the leading byte joins the pending literal run and the window
//! rolls forward one byte.

use std::collections::HashMap;
use std::io::{self, Read};

use deltablob_core::{DeltaBlobError, DeltaBlobResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::rolling::RollingChecksum;
use crate::signature::{check_block_size, Block, Signature};
use crate::strong::digest;

/// Target bytes pulled from the reader per refill
const READ_CHUNK: usize = 64 * 1024;

/// One step of a delta script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy `length` bytes of the basis starting at `basis_offset`
    CopyBlock { basis_offset: u64, length: u64 },
    /// Literal bytes absent from the basis
    InsertData { bytes: Vec<u8> },
}

impl DeltaInstruction {
    /// Bytes this instruction contributes to the output
    pub fn output_length(&self) -> u64 {
        match self {
            DeltaInstruction::CopyBlock { length, .. } => *length,
            DeltaInstruction::InsertData { bytes } => bytes.len() as u64,
        }
    }
}

/// Ordered instructions turning a basis into a target.
///
/// Inserts are coalesced on [`push`](Self::push), so two `InsertData` are
/// never adjacent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaScript {
    expected_output_length: u64,
    instructions: Vec<DeltaInstruction>,
}

impl DeltaScript {
    pub fn new(expected_output_length: u64) -> Self {
        Self {
            expected_output_length,
            instructions: Vec::new(),
        }
    }

    /// Append an instruction, merging literal runs and dropping empty inserts.
    pub fn push(&mut self, instruction: DeltaInstruction) {
        match instruction {
            DeltaInstruction::InsertData { bytes } if bytes.is_empty() => {}
            DeltaInstruction::InsertData { bytes } => match self.instructions.last_mut() {
                Some(DeltaInstruction::InsertData { bytes: run }) => run.extend_from_slice(&bytes),
                _ => self.instructions.push(DeltaInstruction::InsertData { bytes }),
            },
            copy => self.instructions.push(copy),
        }
    }

    pub fn expected_output_length(&self) -> u64 {
        self.expected_output_length
    }

    pub fn instructions(&self) -> &[DeltaInstruction] {
        &self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Summary counts for reporting
    pub fn stats(&self) -> DeltaStats {
        let mut stats = DeltaStats {
            expected_output_length: self.expected_output_length,
            ..DeltaStats::default()
        };
        for instruction in &self.instructions {
            match instruction {
                DeltaInstruction::CopyBlock { length, .. } => {
                    stats.copy_count += 1;
                    stats.copied_bytes += length;
                }
                DeltaInstruction::InsertData { bytes } => {
                    stats.insert_count += 1;
                    stats.inserted_bytes += bytes.len() as u64;
                }
            }
        }
        stats
    }
}

/// Instruction and byte counts of a delta script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub expected_output_length: u64,
    pub copy_count: u64,
    pub copied_bytes: u64,
    pub insert_count: u64,
    pub inserted_bytes: u64,
}

/// Computes a [`DeltaScript`] for a target against a basis [`Signature`].
pub struct DeltaBuilder<'s> {
    signature: &'s Signature,
    /// weak checksum -> block indices, ascending
    index: HashMap<u32, Vec<usize>>,
    /// Length of a trailing short block, if the basis has one
    short_len: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl<'s> DeltaBuilder<'s> {
    pub fn new(signature: &'s Signature) -> DeltaBlobResult<Self> {
        check_block_size(signature.block_size())?;

        let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
        for block in signature.blocks() {
            index.entry(block.weak).or_default().push(block.index);
        }
        let short_len = signature
            .blocks()
            .last()
            .map(|b| b.length)
            .filter(|&len| len < signature.block_size());

        Ok(Self {
            signature,
            index,
            short_len,
            cancel: None,
        })
    }

    /// Abort with `Cancelled` once `token` fires (checked per block of progress).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Scan the target once. Memory is bounded by the read window plus the
    /// pending literal run.
    pub fn build<R: Read>(&self, target: R) -> DeltaBlobResult<DeltaScript> {
        let bs = self.signature.block_size();
        let mut window = Window::new(target);
        let mut script = DeltaScript::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut consumed = 0u64;
        let mut sum: Option<RollingChecksum> = None;
        let mut since_check = 0usize;

        loop {
            let len = window.fill(bs)?;
            if len == 0 {
                break;
            }
            let current = match sum {
                Some(s) => s,
                None => RollingChecksum::from_window(window.get(len)),
            };

            if let Some(block) = self.find_match(current.value(), window.get(len)) {
                if !pending.is_empty() {
                    script.push(DeltaInstruction::InsertData {
                        bytes: std::mem::take(&mut pending),
                    });
                }
                script.push(DeltaInstruction::CopyBlock {
                    basis_offset: block.offset,
                    length: block.length as u64,
                });
                window.advance(len);
                consumed += len as u64;
                sum = None;
                since_check = 0;
                self.check_cancelled()?;
                continue;
            }

            let outgoing = window.get(len)[0];
            pending.push(outgoing);
            window.advance(1);
            consumed += 1;

            let next_len = window.fill(bs)?;
            let mut next = current;
            if next_len == len {
                next.roll(outgoing, window.get(next_len)[next_len - 1]);
            } else {
                next.trim_front(outgoing);
            }
            sum = (next_len > 0).then_some(next);

            since_check += 1;
            if since_check >= bs {
                since_check = 0;
                self.check_cancelled()?;
            }
        }

        if !pending.is_empty() {
            script.push(DeltaInstruction::InsertData { bytes: pending });
        }
        script.expected_output_length = consumed;

        let stats = script.stats();
        debug!(
            target_length = consumed,
            copies = stats.copy_count,
            copied_bytes = stats.copied_bytes,
            inserted_bytes = stats.inserted_bytes,
            "delta built"
        );

        Ok(script)
    }

    /// First block (in index order) whose length, weak and strong checksums
    /// all match the window.
    fn find_match(&self, weak: u32, window: &[u8]) -> Option<&'s Block> {
        let len = window.len();
        if len != self.signature.block_size() && Some(len) != self.short_len {
            return None;
        }
        let candidates = self.index.get(&weak)?;
        let blocks: &'s [Block] = self.signature.blocks();

        let mut strong = None;
        for &i in candidates {
            let block = &blocks[i];
            if block.length != len {
                continue;
            }
            let window_strong = *strong.get_or_insert_with(|| digest(window));
            if window_strong == block.strong {
                return Some(block);
            }
        }
        None
    }

    fn check_cancelled(&self) -> DeltaBlobResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(DeltaBlobError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Buffered view of the target: the bytes from `start` onward are unconsumed.
struct Window<R> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
}

impl<R: Read> Window<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            start: 0,
            eof: false,
        }
    }

    /// Buffer up to `want` unconsumed bytes; returns how many are available.
    fn fill(&mut self, want: usize) -> io::Result<usize> {
        while self.buf.len() - self.start < want && !self.eof {
            if self.start > 0 {
                self.buf.drain(..self.start);
                self.start = 0;
            }
            let old = self.buf.len();
            self.buf.resize(old + READ_CHUNK, 0);
            let read = loop {
                match self.reader.read(&mut self.buf[old..]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.buf.truncate(old);
                        return Err(e);
                    }
                }
            };
            self.buf.truncate(old + read);
            if read == 0 {
                self.eof = true;
            }
        }
        Ok((self.buf.len() - self.start).min(want))
    }

    fn get(&self, len: usize) -> &[u8] {
        &self.buf[self.start..self.start + len]
    }

    fn advance(&mut self, n: usize) {
        self.start += n;
    }
}
