//! Append engine and read path for fixed-block series files.
//!
//! A series file is one `BLOCK_SIZE` block: a 24-byte header followed by a
//! flat array of fixed-width records. Files are created once, zero-filled
//! to their full size, and only ever appended to afterwards. Callers cache
//! the decoded header so steady-state appends cost one data write plus one
//! header rewrite.

use log::{error, info, warn};

use super::header::{FileHeader, HEADER_LEN};
use super::record::{Record, RECORD_LEN};
use super::{BLOCK_SIZE, MAX_BATCH, MAX_DATA_LEN};
use crate::error::StorageError;
use crate::store::BlockStore;

/// Records decoded per store read when scanning a file.
const READ_CHUNK: usize = 32;

/// Summary of a file's occupancy, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub records: u16,
    pub records_remaining: usize,
    pub bytes_used: usize,
    pub start_timestamp: u32,
    pub last_timestamp: u32,
}

/// Read and validate the header of an existing file.
pub fn read_header<S: BlockStore>(
    store: &mut S,
    path: &str,
) -> Result<FileHeader, StorageError<S::Error>> {
    if store.file_len(path).map_err(StorageError::Store)?.is_none() {
        return Err(StorageError::InvalidHeader);
    }
    let mut buf = [0u8; HEADER_LEN];
    let n = store.read_at(path, 0, &mut buf).map_err(StorageError::Store)?;
    FileHeader::decode(&buf[..n]).ok_or(StorageError::InvalidHeader)
}

/// Return the header of a valid existing file, or create the file fresh:
/// new zeroed header, then zero-fill to `BLOCK_SIZE` so later appends touch
/// only data, never filesystem metadata.
///
/// This is the expensive path (multiple writes); it must run only on first
/// touch of a file. Callers keep the returned header cached.
pub fn ensure_file<S: BlockStore>(
    store: &mut S,
    path: &str,
) -> Result<FileHeader, StorageError<S::Error>> {
    if store.file_len(path).map_err(StorageError::Store)?.is_some() {
        let mut buf = [0u8; HEADER_LEN];
        let n = store.read_at(path, 0, &mut buf).map_err(StorageError::Store)?;
        if let Some(header) = FileHeader::decode(&buf[..n]) {
            info!(
                "series found {} ({} records, next_offset {})",
                path, header.record_count, header.next_offset
            );
            return Ok(header);
        }
        // Invalid header: prior contents are unrecoverable by design.
        warn!("series invalid {}, recreating", path);
    }

    let header = FileHeader::new();
    let mut chunk = [0u8; 512];
    chunk[..HEADER_LEN].copy_from_slice(&header.encode());

    let mut offset = 0usize;
    while offset < BLOCK_SIZE {
        let n = store
            .write_at(path, offset as u32, &chunk)
            .map_err(StorageError::Store)?;
        if n != chunk.len() {
            error!("series create {} stalled at {}", path, offset + n);
            return Err(StorageError::WriteFailed);
        }
        offset += n;
        chunk[..HEADER_LEN].fill(0);
    }

    info!("series created {} ({} bytes)", path, BLOCK_SIZE);
    Ok(header)
}

/// Append a batch of records at the cached header's write position and
/// rewrite the header.
///
/// A batch whose bytes would cross the end of the data area is rejected
/// whole with [`StorageError::SeriesFull`] before anything is written; the
/// caller rotates to a fresh file index and retries there. This call never
/// wraps or splits a batch across files.
///
/// A short store write advances the header only by the records actually
/// committed. Zero records committed is a cycle failure
/// ([`StorageError::WriteFailed`]), not retried here.
///
/// Returns the new `next_offset`.
pub fn batch_insert<S: BlockStore>(
    store: &mut S,
    path: &str,
    header: &mut FileHeader,
    records: &[Record],
) -> Result<u16, StorageError<S::Error>> {
    if records.is_empty() {
        return Ok(header.next_offset);
    }

    let total_bytes = records.len() * RECORD_LEN;
    if header.next_offset as usize + total_bytes > MAX_DATA_LEN {
        warn!(
            "series full {} ({} records, batch of {})",
            path,
            header.record_count,
            records.len()
        );
        return Err(StorageError::SeriesFull);
    }

    let write_pos = HEADER_LEN + header.next_offset as usize;
    let mut buf = [0u8; MAX_BATCH * RECORD_LEN];
    let mut written = 0usize;

    'chunks: for chunk in records.chunks(MAX_BATCH) {
        let bytes = chunk.len() * RECORD_LEN;
        for (i, record) in chunk.iter().enumerate() {
            buf[i * RECORD_LEN..(i + 1) * RECORD_LEN].copy_from_slice(&record.to_bytes());
        }
        let pos = (write_pos + written * RECORD_LEN) as u32;
        match store.write_at(path, pos, &buf[..bytes]) {
            Ok(n) => {
                written += n / RECORD_LEN;
                if n < bytes {
                    break 'chunks;
                }
            }
            Err(e) if written == 0 => return Err(StorageError::Store(e)),
            Err(_) => break 'chunks,
        }
    }

    if written == 0 {
        error!("series insert {} failed, 0/{} records", path, records.len());
        return Err(StorageError::WriteFailed);
    }

    if header.start_timestamp == 0 {
        header.start_timestamp = records[0].timestamp;
    }
    header.last_timestamp = records[written - 1].timestamp;
    header.record_count += written as u16;
    header.next_offset += (written * RECORD_LEN) as u16;

    let n = store
        .write_at(path, 0, &header.encode())
        .map_err(StorageError::Store)?;
    if n != HEADER_LEN {
        return Err(StorageError::WriteFailed);
    }

    info!(
        "series insert {}/{} records into {} (total {}, next_offset {})",
        written,
        records.len(),
        path,
        header.record_count,
        header.next_offset
    );
    Ok(header.next_offset)
}

/// Decode `count` records starting at `first_index`, reading in bounded
/// chunks. Returns the records actually decoded.
fn read_records<S: BlockStore>(
    store: &mut S,
    path: &str,
    first_index: usize,
    count: usize,
    out: &mut [Record],
) -> Result<usize, StorageError<S::Error>> {
    let count = count.min(out.len());
    let mut buf = [0u8; READ_CHUNK * RECORD_LEN];
    let mut done = 0usize;

    while done < count {
        let want = (count - done).min(READ_CHUNK);
        let pos = (HEADER_LEN + (first_index + done) * RECORD_LEN) as u32;
        let n = store
            .read_at(path, pos, &mut buf[..want * RECORD_LEN])
            .map_err(StorageError::Store)?;
        let got = n / RECORD_LEN;
        for i in 0..got {
            let mut record = [0u8; RECORD_LEN];
            record.copy_from_slice(&buf[i * RECORD_LEN..(i + 1) * RECORD_LEN]);
            out[done + i] = Record::from_bytes(&record);
        }
        done += got;
        if got < want {
            break;
        }
    }

    Ok(done)
}

/// Validate the header and read up to `record_count` records, capped by the
/// caller's buffer.
pub fn read_all<S: BlockStore>(
    store: &mut S,
    path: &str,
    out: &mut [Record],
) -> Result<(FileHeader, usize), StorageError<S::Error>> {
    let header = read_header(store, path)?;
    let count = header.record_count as usize;
    if count == 0 {
        return Ok((header, 0));
    }
    let n = read_records(store, path, 0, count, out)?;
    Ok((header, n))
}

/// Read the newest records, but only when the file actually covers the
/// requested cutoff: if `last_timestamp < cutoff` the file has nothing new
/// to offer and the result is empty — never stale or fabricated data.
pub fn read_tail_by_time<S: BlockStore>(
    store: &mut S,
    path: &str,
    cutoff: u32,
    out: &mut [Record],
) -> Result<usize, StorageError<S::Error>> {
    let header = read_header(store, path)?;
    if header.last_timestamp < cutoff {
        info!(
            "series tail {} outbound (last_ts {}, cutoff {})",
            path, header.last_timestamp, cutoff
        );
        return Ok(0);
    }

    let available = header.record_count as usize;
    let take = available.min(out.len());
    read_records(store, path, available - take, take, out)
}

/// Bounds-checked random access by record index, independent of any
/// in-memory cache.
pub fn read_at<S: BlockStore>(
    store: &mut S,
    path: &str,
    index: u16,
) -> Result<Option<Record>, StorageError<S::Error>> {
    let header = read_header(store, path)?;
    if index >= header.record_count {
        return Ok(None);
    }
    let mut out = [Record::EMPTY; 1];
    let n = read_records(store, path, index as usize, 1, &mut out)?;
    Ok((n == 1).then_some(out[0]))
}

/// The most recently appended record, if any.
pub fn read_last<S: BlockStore>(
    store: &mut S,
    path: &str,
) -> Result<Option<Record>, StorageError<S::Error>> {
    let header = read_header(store, path)?;
    if header.record_count == 0 {
        return Ok(None);
    }
    read_at(store, path, header.record_count - 1)
}

/// Occupancy summary for diagnostics.
pub fn file_status<S: BlockStore>(
    store: &mut S,
    path: &str,
) -> Result<FileStatus, StorageError<S::Error>> {
    let header = read_header(store, path)?;
    Ok(FileStatus {
        records: header.record_count,
        records_remaining: header.records_remaining(),
        bytes_used: HEADER_LEN + header.next_offset as usize,
        start_timestamp: header.start_timestamp,
        last_timestamp: header.last_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBlockStore;

    fn batch(start_ts: u32, len: usize) -> [Record; 5] {
        let mut records = [Record::EMPTY; 5];
        for (i, r) in records.iter_mut().enumerate().take(len) {
            *r = Record::new(start_ts + i as u32, [i as i16, -(i as i16), 100]);
        }
        records
    }

    #[test]
    fn test_ensure_creates_full_block() {
        let mut store = MemBlockStore::new();
        let header = ensure_file(&mut store, "/f.bin").unwrap();
        assert_eq!(header, FileHeader::new());
        assert_eq!(store.file_len("/f.bin").unwrap(), Some(BLOCK_SIZE as u32));
    }

    #[test]
    fn test_ensure_keeps_existing_header() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();

        let reread = ensure_file(&mut store, "/f.bin").unwrap();
        assert_eq!(reread, header);
        assert_eq!(reread.record_count, 5);
    }

    #[test]
    fn test_ensure_recreates_corrupt_file() {
        let mut store = MemBlockStore::new();
        store.overwrite("/f.bin", b"not a series file").unwrap();
        let header = ensure_file(&mut store, "/f.bin").unwrap();
        assert_eq!(header.record_count, 0);
        assert_eq!(store.file_len("/f.bin").unwrap(), Some(BLOCK_SIZE as u32));
    }

    #[test]
    fn test_append_keeps_invariants() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();

        let mut last_offset = 0;
        for i in 0..10 {
            let offset =
                batch_insert(&mut store, "/f.bin", &mut header, &batch(1000 + i * 5, 5)).unwrap();
            assert!(offset >= last_offset);
            last_offset = offset;
            assert_eq!(
                header.record_count as usize * RECORD_LEN,
                header.next_offset as usize
            );
        }
        assert_eq!(header.record_count, 50);
        assert_eq!(header.start_timestamp, 1000);
        assert_eq!(header.last_timestamp, 1049);
    }

    #[test]
    fn test_capacity_boundary_rejects_whole_batch() {
        // 4096-byte block, 24-byte header, 10-byte record: 407 records fit.
        // 81 batches of 5 land at offset 4050; the 82nd must be refused
        // before any byte is written.
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();

        for i in 0..81 {
            batch_insert(&mut store, "/f.bin", &mut header, &batch(i * 5, 5)).unwrap();
        }
        assert_eq!(header.record_count, 405);
        assert_eq!(header.next_offset, 4050);

        let before = header;
        let result = batch_insert(&mut store, "/f.bin", &mut header, &batch(9999, 5));
        assert_eq!(result, Err(StorageError::SeriesFull));
        assert_eq!(header, before);
        assert_eq!(read_header(&mut store, "/f.bin").unwrap(), before);
    }

    #[test]
    fn test_partial_write_advances_by_committed_records() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();

        // 23 bytes = 2 whole records and a torn third.
        store.write_limit = Some(23);
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();
        assert_eq!(header.record_count, 2);
        assert_eq!(header.next_offset, 20);
        assert_eq!(header.last_timestamp, 1001);
    }

    #[test]
    fn test_insert_into_missing_file_is_store_error() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        store.remove("/f.bin").unwrap();

        // Deleted out-of-band: the write fails and the caller re-resolves.
        let result = batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5));
        assert!(matches!(result, Err(StorageError::Store(_))));
    }

    #[test]
    fn test_read_all_caps_at_buffer() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();

        let mut out = [Record::EMPTY; 3];
        let (read_back, n) = read_all(&mut store, "/f.bin", &mut out).unwrap();
        assert_eq!(read_back.record_count, 5);
        assert_eq!(n, 3);
        assert_eq!(out[0].timestamp, 1000);
        assert_eq!(out[2].timestamp, 1002);
    }

    #[test]
    fn test_tail_after_cutoff_returns_empty() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();

        let mut out = [Record::EMPTY; 8];
        let n = read_tail_by_time(&mut store, "/f.bin", 2000, &mut out).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_tail_returns_newest_records() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1005, 5)).unwrap();

        let mut out = [Record::EMPTY; 3];
        let n = read_tail_by_time(&mut store, "/f.bin", 1000, &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out[0].timestamp, 1007);
        assert_eq!(out[2].timestamp, 1009);
    }

    #[test]
    fn test_read_at_bounds() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();

        assert_eq!(
            read_at(&mut store, "/f.bin", 4).unwrap().unwrap().timestamp,
            1004
        );
        assert_eq!(read_at(&mut store, "/f.bin", 5).unwrap(), None);
    }

    #[test]
    fn test_read_last() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        assert_eq!(read_last(&mut store, "/f.bin").unwrap(), None);

        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();
        assert_eq!(
            read_last(&mut store, "/f.bin").unwrap().unwrap().timestamp,
            1004
        );
    }

    #[test]
    fn test_file_status() {
        let mut store = MemBlockStore::new();
        let mut header = ensure_file(&mut store, "/f.bin").unwrap();
        batch_insert(&mut store, "/f.bin", &mut header, &batch(1000, 5)).unwrap();

        let status = file_status(&mut store, "/f.bin").unwrap();
        assert_eq!(status.records, 5);
        assert_eq!(status.records_remaining, 402);
        assert_eq!(status.bytes_used, HEADER_LEN + 50);
    }
}
