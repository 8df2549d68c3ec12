//! Binary encodings for signatures and delta scripts
//!
//! All integers are big-endian.
//!
//! Signature:
//!   `b"DBSG"` | version u8 | block_size u32 | basis_length u64 |
//!   per block: weak u32 | strong [u8; 32]
//!
//! Delta:
//!   `b"DBDL"` | version u8 | expected_output_length u64 |
//!   records until end of input:
//!     `0x01` offset u64 length u64            (copy)
//!     `0x02` length u64 bytes[length]         (insert)

use bytes::{Buf, BufMut, BytesMut};
use deltablob_core::{DeltaBlobError, DeltaBlobResult};

use crate::delta::{DeltaInstruction, DeltaScript};
use crate::signature::{block_count, Signature};
use crate::strong::{StrongChecksum, STRONG_LEN};

pub const SIGNATURE_MAGIC: &[u8; 4] = b"DBSG";
pub const DELTA_MAGIC: &[u8; 4] = b"DBDL";
pub const FORMAT_VERSION: u8 = 1;

const SIGNATURE_HEADER_LEN: usize = 4 + 1 + 4 + 8;
const SIGNATURE_RECORD_LEN: usize = 4 + STRONG_LEN;
const DELTA_HEADER_LEN: usize = 4 + 1 + 8;

const TAG_COPY: u8 = 0x01;
const TAG_INSERT: u8 = 0x02;

pub fn encode_signature(signature: &Signature) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(
        SIGNATURE_HEADER_LEN + signature.blocks().len() * SIGNATURE_RECORD_LEN,
    );
    buf.put_slice(SIGNATURE_MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32(signature.block_size() as u32);
    buf.put_u64(signature.basis_length());
    for block in signature.blocks() {
        buf.put_u32(block.weak);
        buf.put_slice(block.strong.as_bytes());
    }
    buf.to_vec()
}

/// Decode a signature. Malformed input fails `InvalidArgument`.
pub fn decode_signature(data: &[u8]) -> DeltaBlobResult<Signature> {
    let invalid = |msg: String| DeltaBlobError::InvalidArgument(format!("signature: {msg}"));

    let mut buf = data;
    if buf.remaining() < SIGNATURE_HEADER_LEN {
        return Err(invalid(format!("{} bytes is shorter than the header", data.len())));
    }
    read_magic(&mut buf, SIGNATURE_MAGIC).map_err(invalid)?;
    let block_size = buf.get_u32() as usize;
    let basis_length = buf.get_u64();

    if block_size == 0 {
        return Err(invalid("block size is zero".into()));
    }
    let expected = block_count(basis_length, block_size) as u128;
    let present = buf.remaining() / SIGNATURE_RECORD_LEN;
    if buf.remaining() % SIGNATURE_RECORD_LEN != 0 || present as u128 != expected {
        return Err(invalid(format!(
            "{} record bytes do not hold {expected} blocks",
            buf.remaining()
        )));
    }

    let mut checksums = Vec::with_capacity(present);
    while buf.has_remaining() {
        let weak = buf.get_u32();
        let mut strong = [0u8; STRONG_LEN];
        buf.copy_to_slice(&mut strong);
        checksums.push((weak, StrongChecksum::from_bytes(strong)));
    }

    Signature::from_checksums(block_size, basis_length, checksums)
}

pub fn encode_delta(script: &DeltaScript) -> Vec<u8> {
    let body: usize = script
        .instructions()
        .iter()
        .map(|i| match i {
            DeltaInstruction::CopyBlock { .. } => 17,
            DeltaInstruction::InsertData { bytes } => 9 + bytes.len(),
        })
        .sum();

    let mut buf = BytesMut::with_capacity(DELTA_HEADER_LEN + body);
    buf.put_slice(DELTA_MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u64(script.expected_output_length());
    for instruction in script.instructions() {
        match instruction {
            DeltaInstruction::CopyBlock {
                basis_offset,
                length,
            } => {
                buf.put_u8(TAG_COPY);
                buf.put_u64(*basis_offset);
                buf.put_u64(*length);
            }
            DeltaInstruction::InsertData { bytes } => {
                buf.put_u8(TAG_INSERT);
                buf.put_u64(bytes.len() as u64);
                buf.put_slice(bytes);
            }
        }
    }
    buf.to_vec()
}

/// Decode a delta script. Malformed input fails `InvalidDelta`.
pub fn decode_delta(data: &[u8]) -> DeltaBlobResult<DeltaScript> {
    let invalid = |msg: String| DeltaBlobError::InvalidDelta(msg);

    let mut buf = data;
    if buf.remaining() < DELTA_HEADER_LEN {
        return Err(invalid(format!("{} bytes is shorter than the header", data.len())));
    }
    read_magic(&mut buf, DELTA_MAGIC).map_err(invalid)?;
    let mut script = DeltaScript::new(buf.get_u64());

    while buf.has_remaining() {
        let at = data.len() - buf.remaining();
        match buf.get_u8() {
            TAG_COPY => {
                if buf.remaining() < 16 {
                    return Err(invalid(format!("truncated copy record at byte {at}")));
                }
                let basis_offset = buf.get_u64();
                let length = buf.get_u64();
                script.push(DeltaInstruction::CopyBlock {
                    basis_offset,
                    length,
                });
            }
            TAG_INSERT => {
                if buf.remaining() < 8 {
                    return Err(invalid(format!("truncated insert record at byte {at}")));
                }
                let len = buf.get_u64();
                if len > buf.remaining() as u64 {
                    return Err(invalid(format!(
                        "insert at byte {at} declares {len} bytes, {} remain",
                        buf.remaining()
                    )));
                }
                let bytes = buf.copy_to_bytes(len as usize).to_vec();
                script.push(DeltaInstruction::InsertData { bytes });
            }
            tag => return Err(invalid(format!("unknown record tag {tag:#04x} at byte {at}"))),
        }
    }

    Ok(script)
}

fn read_magic(buf: &mut &[u8], magic: &[u8; 4]) -> Result<(), String> {
    let mut found = [0u8; 4];
    buf.copy_to_slice(&mut found);
    if &found != magic {
        return Err(format!("bad magic {found:02x?}"));
    }
    let version = buf.get_u8();
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaBuilder;
    use crate::signature::SignatureBuilder;

    fn sample() -> (Signature, DeltaScript) {
        let sig = SignatureBuilder::new(4).unwrap().build(&b"ABCDEFGHIJ"[..]).unwrap();
        let script = DeltaBuilder::new(&sig).unwrap().build(&b"ABCDXEFGHIJ"[..]).unwrap();
        (sig, script)
    }

    #[test]
    fn signature_roundtrip() {
        let (sig, _) = sample();
        let bytes = encode_signature(&sig);
        assert_eq!(bytes.len(), SIGNATURE_HEADER_LEN + 3 * SIGNATURE_RECORD_LEN);
        assert_eq!(&bytes[..4], SIGNATURE_MAGIC);
        assert_eq!(decode_signature(&bytes).unwrap(), sig);
    }

    #[test]
    fn empty_basis_signature_is_header_only() {
        let sig = SignatureBuilder::new(64).unwrap().build(&b""[..]).unwrap();
        let bytes = encode_signature(&sig);
        assert_eq!(bytes.len(), SIGNATURE_HEADER_LEN);
        assert!(decode_signature(&bytes).unwrap().is_empty());
    }

    #[test]
    fn delta_roundtrip() {
        let (_, script) = sample();
        let bytes = encode_delta(&script);
        assert_eq!(&bytes[..4], DELTA_MAGIC);
        assert_eq!(decode_delta(&bytes).unwrap(), script);
    }

    #[test]
    fn signature_with_missing_record_is_rejected() {
        let (sig, _) = sample();
        let bytes = encode_signature(&sig);
        let err = decode_signature(&bytes[..bytes.len() - SIGNATURE_RECORD_LEN]).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn signature_with_bad_magic_is_rejected() {
        let (sig, _) = sample();
        let mut bytes = encode_signature(&sig);
        bytes[0] = b'X';
        assert!(decode_signature(&bytes).is_err());
        assert!(decode_signature(b"DB").is_err());
    }

    #[test]
    fn delta_in_place_of_signature_is_rejected() {
        let (_, script) = sample();
        let err = decode_signature(&encode_delta(&script)).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn oversized_insert_length_is_rejected() {
        let mut bytes = DELTA_MAGIC.to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&5u64.to_be_bytes());
        bytes.push(TAG_INSERT);
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        bytes.extend_from_slice(b"hello");

        let err = decode_delta(&bytes).unwrap_err();
        assert_eq!(err.code(), "InvalidDelta");
    }

    #[test]
    fn unknown_tag_and_truncation_are_rejected() {
        let (_, script) = sample();
        let bytes = encode_delta(&script);

        let mut tagged = bytes.clone();
        tagged.push(0x7f);
        assert_eq!(decode_delta(&tagged).unwrap_err().code(), "InvalidDelta");

        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(decode_delta(cut).unwrap_err().code(), "InvalidDelta");

        let mut versioned = bytes;
        versioned[4] = 9;
        assert_eq!(decode_delta(&versioned).unwrap_err().code(), "InvalidDelta");
    }

    #[test]
    fn adjacent_inserts_are_coalesced_on_decode() {
        let mut bytes = DELTA_MAGIC.to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&4u64.to_be_bytes());
        for chunk in [&b"ab"[..], &b"cd"[..]] {
            bytes.push(TAG_INSERT);
            bytes.extend_from_slice(&(chunk.len() as u64).to_be_bytes());
            bytes.extend_from_slice(chunk);
        }

        let script = decode_delta(&bytes).unwrap();
        assert_eq!(
            script.instructions(),
            &[DeltaInstruction::InsertData {
                bytes: b"abcd".to_vec()
            }]
        );
    }
}
