//! On-disk layout of a store file.
//!
//! ```text
//! block 0, 1   store header (two copies)   H:2,block:..,chunk:..,format:..,checksum:..\n
//! block 2..    chunks, each a whole number of blocks:
//!                chunk:..,block:..,len:..,version:..,length:..,checksum:..\n
//!                payload (length bytes)
//!                ...
//!                footer in the last 128 bytes: chunk:..,block:..,version:..,checksum:..\n
//! ```
//!
//! Every chunk holds a complete snapshot of all maps and spatial indexes
//! at one version, so any single intact chunk is enough to open the
//! store. The footer of the last chunk in the file is the fallback when
//! the header points nowhere useful.

use crate::error::{MVStoreError, MVStoreResult};
use crate::file_store::FileStore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use nitrite::common::Value;
use nitrite::store::rtree::BoundingBox;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const BLOCK_SIZE: u64 = 4096;
pub(crate) const MAX_HEADER_LENGTH: usize = 1024;
pub(crate) const FOOTER_LENGTH: usize = 128;
/// Blocks taken by the two header copies.
pub(crate) const HEADER_BLOCKS: u64 = 2;

/// Format written by this engine.
pub(crate) const FORMAT_VERSION: u32 = 2;
/// Oldest format opened directly; older files go through the upgrade path.
pub(crate) const FORMAT_MIN: u32 = 2;

const CODEC_COMPRESSED: u8 = 0b01;
const CODEC_ENCRYPTED: u8 = 0b10;
const NONCE_LENGTH: usize = 12;
const SALT_LENGTH: usize = 16;

/// Contents of one chunk.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) maps: BTreeMap<String, Vec<(Value, Value)>>,
    pub(crate) rtrees: BTreeMap<String, Vec<(BoundingBox, u64)>>,
}

impl Snapshot {
    pub(crate) fn to_bytes(&self) -> MVStoreResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MVStoreError::Encoding(e.to_string()))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> MVStoreResult<Snapshot> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(snapshot, _)| snapshot)
            .map_err(|e| MVStoreError::Corrupted(format!("unreadable chunk payload: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoreHeader {
    pub(crate) format: u32,
    pub(crate) created: u64,
    pub(crate) block: u64,
    pub(crate) chunk: u64,
    pub(crate) version: u64,
    pub(crate) salt: Option<Vec<u8>>,
}

impl StoreHeader {
    pub(crate) fn new(created: u64, salt: Option<Vec<u8>>) -> Self {
        StoreHeader {
            format: FORMAT_VERSION,
            created,
            block: 0,
            chunk: 0,
            version: 0,
            salt,
        }
    }

    pub(crate) fn to_block(&self) -> Vec<u8> {
        let mut line = format!(
            "H:2,block:{:x},blockSize:{:x},chunk:{:x},created:{:x},format:{},version:{:x}",
            self.block, BLOCK_SIZE, self.chunk, self.created, self.format, self.version
        );
        if let Some(salt) = &self.salt {
            line.push_str(&format!(",salt:{}", to_hex(salt)));
        }
        let checksum = crc32fast::hash(line.as_bytes());
        line.push_str(&format!(",checksum:{:x}\n", checksum));

        let mut block = vec![0u8; BLOCK_SIZE as usize];
        block[..line.len()].copy_from_slice(line.as_bytes());
        block
    }

    /// Parses a header block; `None` if it is not a header or its
    /// checksum does not match.
    pub(crate) fn parse(block: &[u8]) -> Option<StoreHeader> {
        if block.first() != Some(&b'H') {
            return None;
        }
        let line = first_line(block, BLOCK_SIZE as usize)?;
        let fields = checked_fields(line)?;
        Some(StoreHeader {
            format: fields.get("format")?.parse().ok()?,
            created: hex_field(&fields, "created")?,
            block: hex_field(&fields, "block")?,
            chunk: hex_field(&fields, "chunk")?,
            version: hex_field(&fields, "version")?,
            salt: match fields.get("salt") {
                Some(s) => Some(from_hex(s)?),
                None => None,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChunkHeader {
    pub(crate) id: u64,
    pub(crate) block: u64,
    /// Length in blocks.
    pub(crate) len: u64,
    pub(crate) version: u64,
    /// Payload length in bytes.
    pub(crate) length: u64,
    pub(crate) checksum: u32,
}

impl ChunkHeader {
    fn to_line(&self) -> String {
        format!(
            "chunk:{:x},block:{:x},len:{:x},version:{:x},length:{:x},checksum:{:x}\n",
            self.id, self.block, self.len, self.version, self.length, self.checksum
        )
    }
}

/// Reads the chunk header at the start of `bytes`.
///
/// Returns `None` unless `bytes` begins with a well formed chunk header
/// line within the first [MAX_HEADER_LENGTH] bytes.
pub(crate) fn parse_chunk_header(bytes: &[u8]) -> Option<ChunkHeader> {
    if bytes.first() != Some(&b'c') {
        return None;
    }
    let line = first_line(bytes, MAX_HEADER_LENGTH)?;
    let fields = parse_fields(line);
    Some(ChunkHeader {
        id: hex_field(&fields, "chunk")?,
        block: hex_field(&fields, "block")?,
        len: hex_field(&fields, "len")?,
        version: hex_field(&fields, "version")?,
        length: hex_field(&fields, "length")?,
        checksum: u32::from_str_radix(fields.get("checksum")?, 16).ok()?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChunkFooter {
    pub(crate) id: u64,
    pub(crate) block: u64,
    pub(crate) version: u64,
}

impl ChunkFooter {
    fn to_bytes(&self) -> Vec<u8> {
        let mut line = format!(
            "chunk:{:x},block:{:x},version:{:x}",
            self.id, self.block, self.version
        );
        let checksum = crc32fast::hash(line.as_bytes());
        line.push_str(&format!(",checksum:{:x}\n", checksum));

        let mut bytes = vec![0u8; FOOTER_LENGTH];
        bytes[..line.len()].copy_from_slice(line.as_bytes());
        bytes
    }

    pub(crate) fn parse(bytes: &[u8]) -> Option<ChunkFooter> {
        let line = first_line(bytes, FOOTER_LENGTH)?;
        let fields = checked_fields(line)?;
        Some(ChunkFooter {
            id: hex_field(&fields, "chunk")?,
            block: hex_field(&fields, "block")?,
            version: hex_field(&fields, "version")?,
        })
    }
}

/// Lays out a chunk starting at `block`. The returned bytes span whole
/// blocks.
pub(crate) fn encode_chunk(id: u64, block: u64, version: u64, payload: &[u8]) -> (ChunkHeader, Vec<u8>) {
    let mut header = ChunkHeader {
        id,
        block,
        len: 1,
        version,
        length: payload.len() as u64,
        checksum: crc32fast::hash(payload),
    };

    // the header line grows with `len`, so settle `len` first
    loop {
        let needed = header.to_line().len() + payload.len() + FOOTER_LENGTH;
        let len = (needed as u64).div_ceil(BLOCK_SIZE);
        if len <= header.len {
            break;
        }
        header.len = len;
    }

    let total = (header.len * BLOCK_SIZE) as usize;
    let line = header.to_line();
    let mut bytes = vec![0u8; total];
    bytes[..line.len()].copy_from_slice(line.as_bytes());
    bytes[line.len()..line.len() + payload.len()].copy_from_slice(payload);

    let footer = ChunkFooter { id, block, version }.to_bytes();
    bytes[total - FOOTER_LENGTH..].copy_from_slice(&footer);
    (header, bytes)
}

/// Reads and verifies the chunk starting at `block`, returning its raw
/// (still encoded) payload.
pub(crate) fn read_chunk(file: &FileStore, block: u64) -> MVStoreResult<(ChunkHeader, Vec<u8>)> {
    let pos = block * BLOCK_SIZE;
    let first = file.read_at_most(pos, BLOCK_SIZE as usize)?;
    let header = parse_chunk_header(&first)
        .ok_or_else(|| MVStoreError::Corrupted(format!("no chunk at block {:x}", block)))?;

    if header.block != block || header.len == 0 {
        return Err(MVStoreError::Corrupted(format!(
            "chunk {:x} claims block {:x} but was found at block {:x}",
            header.id, header.block, block
        )));
    }

    let total = (header.len * BLOCK_SIZE) as usize;
    let bytes = file.read_at_most(pos, total)?;
    if bytes.len() < total {
        return Err(MVStoreError::Corrupted(format!("chunk {:x} is truncated", header.id)));
    }

    let start = header.to_line().len();
    let end = start + header.length as usize;
    if end > total - FOOTER_LENGTH {
        return Err(MVStoreError::Corrupted(format!("chunk {:x} has a bad length", header.id)));
    }

    let payload = bytes[start..end].to_vec();
    if crc32fast::hash(&payload) != header.checksum {
        return Err(MVStoreError::Corrupted(format!(
            "checksum mismatch in chunk {:x}",
            header.id
        )));
    }

    match ChunkFooter::parse(&bytes[total - FOOTER_LENGTH..]) {
        Some(footer) if footer.id == header.id && footer.version == header.version => {
            Ok((header, payload))
        }
        _ => Err(MVStoreError::Corrupted(format!(
            "footer of chunk {:x} does not match its header",
            header.id
        ))),
    }
}

/// Footer of the last chunk in the file, if the file ends with one.
pub(crate) fn read_last_footer(file: &FileStore) -> MVStoreResult<Option<ChunkFooter>> {
    let size = file.size()?;
    if size < HEADER_BLOCKS * BLOCK_SIZE + FOOTER_LENGTH as u64 {
        return Ok(None);
    }
    let bytes = file.read_at_most(size - FOOTER_LENGTH as u64, FOOTER_LENGTH)?;
    Ok(ChunkFooter::parse(&bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    /// zstd level 3
    Fast,
    /// zstd level 19
    High,
}

/// Turns a serialized snapshot into a stored payload and back.
#[derive(Clone)]
pub(crate) struct ChunkCodec {
    compression: Compression,
    cipher: Option<Aes256Gcm>,
}

impl ChunkCodec {
    pub(crate) fn new(compression: Compression, cipher: Option<Aes256Gcm>) -> Self {
        ChunkCodec { compression, cipher }
    }

    pub(crate) fn plain() -> Self {
        ChunkCodec::new(Compression::None, None)
    }

    pub(crate) fn encode(&self, data: Vec<u8>) -> MVStoreResult<Vec<u8>> {
        let mut flags = 0u8;
        let mut body = match self.compression {
            Compression::None => data,
            Compression::Fast | Compression::High => {
                flags |= CODEC_COMPRESSED;
                let level = if self.compression == Compression::High { 19 } else { 3 };
                zstd::bulk::compress(&data, level)?
            }
        };

        if let Some(cipher) = &self.cipher {
            flags |= CODEC_ENCRYPTED;
            let nonce = Aes256Gcm::generate_nonce(&mut AeadRng);
            let sealed = cipher
                .encrypt(&nonce, body.as_slice())
                .map_err(|e| MVStoreError::Encoding(format!("encryption failed: {}", e)))?;
            let mut framed = nonce.to_vec();
            framed.extend_from_slice(&sealed);
            body = framed;
        }

        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(flags);
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    pub(crate) fn decode(&self, payload: &[u8]) -> MVStoreResult<Vec<u8>> {
        let (flags, body) = payload
            .split_first()
            .ok_or_else(|| MVStoreError::Corrupted("empty chunk payload".to_string()))?;

        let mut data = body.to_vec();
        if flags & CODEC_ENCRYPTED != 0 {
            let cipher = self.cipher.as_ref().ok_or(MVStoreError::WrongKey)?;
            if data.len() < NONCE_LENGTH {
                return Err(MVStoreError::Corrupted("encrypted payload too short".to_string()));
            }
            let (nonce, sealed) = data.split_at(NONCE_LENGTH);
            data = cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| MVStoreError::WrongKey)?;
        }

        if flags & CODEC_COMPRESSED != 0 {
            data = zstd::stream::decode_all(data.as_slice())
                .map_err(|e| MVStoreError::Corrupted(format!("decompression failed: {}", e)))?;
        }
        Ok(data)
    }
}

pub(crate) fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives the AES-256 key for `secret` with Argon2.
pub(crate) fn derive_cipher(secret: &[u8], salt: &[u8]) -> MVStoreResult<Aes256Gcm> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| MVStoreError::Encoding(format!("key derivation failed: {}", e)))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)))
}

fn first_line(bytes: &[u8], limit: usize) -> Option<&str> {
    let window = &bytes[..bytes.len().min(limit)];
    let end = window.iter().position(|b| *b == b'\n')?;
    std::str::from_utf8(&window[..end]).ok()
}

fn parse_fields(line: &str) -> BTreeMap<&str, &str> {
    line.split(',')
        .filter_map(|field| field.split_once(':'))
        .collect()
}

/// Fields of a line ending in `,checksum:<crc of everything before>`.
fn checked_fields(line: &str) -> Option<BTreeMap<&str, &str>> {
    let (body, checksum) = line.rsplit_once(",checksum:")?;
    let expected = u32::from_str_radix(checksum, 16).ok()?;
    if crc32fast::hash(body.as_bytes()) != expected {
        return None;
    }
    Some(parse_fields(body))
}

fn hex_field(fields: &BTreeMap<&str, &str>, name: &str) -> Option<u64> {
    u64::from_str_radix(fields.get(name)?, 16).ok()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
