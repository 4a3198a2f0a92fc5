use crate::chunk::{
    derive_cipher, encode_chunk, generate_salt, parse_chunk_header, read_chunk, read_last_footer,
    ChunkCodec, ChunkHeader, Snapshot, StoreHeader, BLOCK_SIZE, FORMAT_MIN, FORMAT_VERSION,
    HEADER_BLOCKS, MAX_HEADER_LENGTH,
};
use crate::config::MVStoreConfig;
use crate::error::{MVStoreError, MVStoreResult};
use crate::file_store::FileStore;
use nitrite::common::get_current_time_or_zero;

/// A chunked store file opened for reading and appending.
pub(crate) struct PageFile {
    file: FileStore,
    header: StoreHeader,
    codec: ChunkCodec,
    next_block: u64,
    last_chunk_id: u64,
}

impl PageFile {
    /// Opens `file`, formatting it first when it is empty and writable.
    pub(crate) fn open_or_create(
        file: FileStore,
        config: &MVStoreConfig,
    ) -> MVStoreResult<(PageFile, Snapshot)> {
        if file.size()? == 0 && !file.is_read_only() {
            let page_file = PageFile::create(file, config)?;
            return Ok((page_file, Snapshot::default()));
        }
        PageFile::open(file, config)
    }

    /// Writes both header copies of a new, empty store.
    pub(crate) fn create(file: FileStore, config: &MVStoreConfig) -> MVStoreResult<PageFile> {
        let key = config.encryption_key();
        let salt = key.as_ref().map(|_| generate_salt());
        let header = StoreHeader::new(get_current_time_or_zero() as u64, salt);
        let codec = codec_for(config, &header)?;

        let page_file = PageFile {
            file,
            header,
            codec,
            next_block: HEADER_BLOCKS,
            last_chunk_id: 0,
        };
        page_file.write_header()?;
        Ok(page_file)
    }

    /// Opens an existing store and decodes its newest readable chunk.
    pub(crate) fn open(file: FileStore, config: &MVStoreConfig) -> MVStoreResult<(PageFile, Snapshot)> {
        let mut header = read_store_header(&file)?;
        check_format(header.format)?;
        let codec = codec_for(config, &header)?;

        let mut candidates = Vec::new();
        if header.version > 0 {
            candidates.push(header.block);
        }
        if let Some(footer) = read_last_footer(&file)? {
            if !candidates.contains(&footer.block) {
                candidates.push(footer.block);
            }
        }

        let mut newest: Option<(ChunkHeader, Snapshot)> = None;
        let mut failure = None;
        for block in candidates.iter().copied() {
            match load_chunk(&file, &codec, block) {
                Ok((chunk, snapshot)) => {
                    if newest.as_ref().map_or(true, |(n, _)| chunk.version > n.version) {
                        newest = Some((chunk, snapshot));
                    }
                }
                Err(MVStoreError::WrongKey) => return Err(MVStoreError::WrongKey),
                Err(e) => failure = Some(e),
            }
        }

        if newest.is_none() && config.recovery_mode() && !candidates.is_empty() {
            log::warn!("Last chunk unreadable, scanning for an older one");
            newest = scan_newest_chunk(&file, &codec)?;
        }

        let (chunk, snapshot) = match newest {
            Some(found) => found,
            None if candidates.is_empty() => {
                return Ok((PageFile::from_parts(file, header, codec, 0)?, Snapshot::default()))
            }
            None => {
                return Err(failure
                    .unwrap_or_else(|| MVStoreError::Corrupted("no readable chunk".to_string())))
            }
        };

        header.block = chunk.block;
        header.chunk = chunk.id;
        header.version = chunk.version;
        let page_file = PageFile::from_parts(file, header, codec, chunk.id)?;
        Ok((page_file, snapshot))
    }

    fn from_parts(
        file: FileStore,
        header: StoreHeader,
        codec: ChunkCodec,
        last_chunk_id: u64,
    ) -> MVStoreResult<PageFile> {
        let next_block = file.size()?.div_ceil(BLOCK_SIZE).max(HEADER_BLOCKS);
        Ok(PageFile {
            file,
            header,
            codec,
            next_block,
            last_chunk_id,
        })
    }

    /// Version of the newest chunk, 0 before the first commit.
    pub(crate) fn version(&self) -> u64 {
        self.header.version
    }

    /// Appends `snapshot` as a new chunk and points the header at it.
    pub(crate) fn write_snapshot(&mut self, snapshot: &Snapshot) -> MVStoreResult<u64> {
        let payload = self.codec.encode(snapshot.to_bytes()?)?;
        let id = self.last_chunk_id + 1;
        let version = self.header.version + 1;
        let (chunk, bytes) = encode_chunk(id, self.next_block, version, &payload);

        self.file.write_all_at(&bytes, self.next_block * BLOCK_SIZE)?;
        self.file.sync()?;

        self.header.block = chunk.block;
        self.header.chunk = chunk.id;
        self.header.version = chunk.version;
        self.write_header()?;

        self.next_block += chunk.len;
        self.last_chunk_id = id;
        Ok(version)
    }

    /// Moves the newest chunk to the front of the file and truncates
    /// everything behind it.
    ///
    /// Skipped when the copy would overlap the newest chunk, in which
    /// case the file is already close to its minimal size.
    pub(crate) fn compact(&mut self) -> MVStoreResult<()> {
        if self.header.version == 0 {
            return Ok(());
        }
        let (current, payload) = read_chunk(&self.file, self.header.block)?;
        if current.block == HEADER_BLOCKS {
            self.file.truncate((HEADER_BLOCKS + current.len) * BLOCK_SIZE)?;
            self.next_block = HEADER_BLOCKS + current.len;
            return self.file.sync();
        }

        let id = self.last_chunk_id + 1;
        let (chunk, bytes) = encode_chunk(id, HEADER_BLOCKS, current.version, &payload);
        if HEADER_BLOCKS + chunk.len > current.block {
            log::debug!("Skipping compaction, newest chunk is near the file start");
            return Ok(());
        }

        self.file.write_all_at(&bytes, HEADER_BLOCKS * BLOCK_SIZE)?;
        self.file.sync()?;
        self.header.block = chunk.block;
        self.header.chunk = chunk.id;
        self.write_header()?;

        self.file.truncate((HEADER_BLOCKS + chunk.len) * BLOCK_SIZE)?;
        self.file.sync()?;
        self.next_block = HEADER_BLOCKS + chunk.len;
        self.last_chunk_id = id;
        log::debug!("Compacted store file to {} blocks", self.next_block);
        Ok(())
    }

    pub(crate) fn sync(&self) -> MVStoreResult<()> {
        if self.file.is_read_only() {
            return Ok(());
        }
        self.file.sync()
    }

    fn write_header(&self) -> MVStoreResult<()> {
        let block = self.header.to_block();
        self.file.write_all_at(&block, 0)?;
        self.file.write_all_at(&block, BLOCK_SIZE)?;
        self.file.sync()
    }
}

/// The valid header copy with the highest version.
pub(crate) fn read_store_header(file: &FileStore) -> MVStoreResult<StoreHeader> {
    let bytes = file.read_at_most(0, (HEADER_BLOCKS * BLOCK_SIZE) as usize)?;
    bytes
        .chunks(BLOCK_SIZE as usize)
        .filter_map(StoreHeader::parse)
        .max_by_key(|header| header.version)
        .ok_or_else(|| MVStoreError::Corrupted("store header not found".to_string()))
}

fn check_format(format: u32) -> MVStoreResult<()> {
    if format < FORMAT_MIN {
        return Err(MVStoreError::FormatTooOld {
            found: format,
            minimum: FORMAT_MIN,
        });
    }
    if format > FORMAT_VERSION {
        return Err(MVStoreError::FormatTooNew(format));
    }
    Ok(())
}

fn codec_for(config: &MVStoreConfig, header: &StoreHeader) -> MVStoreResult<ChunkCodec> {
    let cipher = match (config.encryption_key(), &header.salt) {
        (Some(key), Some(salt)) => Some(derive_cipher(&key, salt)?),
        (None, _) => None,
        (Some(_), None) => {
            log::error!("Encryption key given for an unencrypted store");
            return Err(MVStoreError::WrongKey);
        }
    };
    Ok(ChunkCodec::new(config.compression(), cipher))
}

fn load_chunk(
    file: &FileStore,
    codec: &ChunkCodec,
    block: u64,
) -> MVStoreResult<(ChunkHeader, Snapshot)> {
    let (chunk, payload) = read_chunk(file, block)?;
    let snapshot = Snapshot::from_bytes(&codec.decode(&payload)?)?;
    Ok((chunk, snapshot))
}

/// Every block starting with a chunk header that names its own block.
pub(crate) fn scan_chunk_headers(file: &FileStore) -> MVStoreResult<Vec<ChunkHeader>> {
    let blocks = file.size()?.div_ceil(BLOCK_SIZE);
    let mut headers = Vec::new();
    let mut block = HEADER_BLOCKS;
    while block < blocks {
        let bytes = file.read_at_most(block * BLOCK_SIZE, MAX_HEADER_LENGTH)?;
        match parse_chunk_header(&bytes) {
            Some(header) if header.block == block && header.len > 0 => {
                block += header.len;
                headers.push(header);
            }
            _ => block += 1,
        }
    }
    Ok(headers)
}

fn scan_newest_chunk(
    file: &FileStore,
    codec: &ChunkCodec,
) -> MVStoreResult<Option<(ChunkHeader, Snapshot)>> {
    let mut headers = scan_chunk_headers(file)?;
    headers.sort_by(|a, b| b.version.cmp(&a.version));
    for header in headers {
        match load_chunk(file, codec, header.block) {
            Ok(found) => return Ok(Some(found)),
            Err(MVStoreError::WrongKey) => return Err(MVStoreError::WrongKey),
            Err(e) => log::warn!("Skipping chunk {:x}: {}", header.id, e),
        }
    }
    Ok(None)
}
