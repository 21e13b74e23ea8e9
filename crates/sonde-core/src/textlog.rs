//! Two-file rotating text log on the card.
//!
//! Diagnostics survive a reboot without ever growing unbounded: lines
//! append to `<root>/log/<prefix>_<n>.txt` until `max_lines`, then the
//! writer flips to the other file and truncates it. Reading back returns
//! the tail of the current file followed by the previous one, newest file
//! first.

use core::fmt::Write;

use log::warn;

use crate::error::StorageError;
use crate::store::BlockStore;

/// Files rotated through per log.
pub const ROTATE_FILE_COUNT: u8 = 2;

/// Longest line accepted; longer messages are truncated.
const LINE_MAX: usize = 160;

pub struct RotateLog {
    prefix: &'static str,
    file_num: u8,
    lines: u32,
    write_pos: u32,
    max_lines: u32,
}

impl RotateLog {
    pub const fn new(prefix: &'static str, max_lines: u32) -> Self {
        Self {
            prefix,
            file_num: 0,
            lines: 0,
            write_pos: 0,
            max_lines,
        }
    }

    fn path(&self, root: &str, file_num: u8) -> Option<heapless::String<64>> {
        let mut buf = heapless::String::new();
        write!(buf, "{}/log/{}_{}.txt", root, self.prefix, file_num).ok()?;
        Some(buf)
    }

    /// Append one line. The first write after boot (and after each
    /// rotation) truncates its target file, so a restarted hub starts file
    /// 0 fresh while file 1 still holds the previous tail.
    pub fn write_line<S: BlockStore>(
        &mut self,
        store: &mut S,
        root: &str,
        msg: &str,
    ) -> Result<(), StorageError<S::Error>> {
        if self.lines >= self.max_lines {
            self.file_num = (self.file_num + 1) % ROTATE_FILE_COUNT;
            self.lines = 0;
        }

        let mut line = heapless::String::<LINE_MAX>::new();
        // Overlong messages are truncated rather than dropped.
        let _ = line.push_str(msg);
        let _ = line.push('\n');

        let path = self.path(root, self.file_num).ok_or(StorageError::Format)?;
        if self.lines == 0 {
            store
                .overwrite(&path, line.as_bytes())
                .map_err(StorageError::Store)?;
            self.write_pos = line.len() as u32;
        } else {
            let n = store
                .write_at(&path, self.write_pos, line.as_bytes())
                .map_err(StorageError::Store)?;
            self.write_pos += n as u32;
        }
        self.lines += 1;
        Ok(())
    }

    /// Copy the newest log text into `out`: tail of the current file, then
    /// as much of the previous file as still fits. Returns bytes copied.
    pub fn read_latest<S: BlockStore>(
        &self,
        store: &mut S,
        root: &str,
        out: &mut [u8],
    ) -> Result<usize, StorageError<S::Error>> {
        let mut total = 0usize;

        let current = self.path(root, self.file_num).ok_or(StorageError::Format)?;
        total += Self::read_tail(store, &current, out)?;

        if total < out.len() && ROTATE_FILE_COUNT > 1 {
            let prev_num = (self.file_num + ROTATE_FILE_COUNT - 1) % ROTATE_FILE_COUNT;
            let prev = self.path(root, prev_num).ok_or(StorageError::Format)?;
            total += Self::read_tail(store, &prev, &mut out[total..])?;
        }

        Ok(total)
    }

    fn read_tail<S: BlockStore>(
        store: &mut S,
        path: &str,
        out: &mut [u8],
    ) -> Result<usize, StorageError<S::Error>> {
        let Some(len) = store.file_len(path).map_err(StorageError::Store)? else {
            return Ok(0);
        };
        let take = (len as usize).min(out.len());
        if take == 0 {
            return Ok(0);
        }
        store
            .read_at(path, len - take as u32, &mut out[..take])
            .map_err(StorageError::Store)
    }
}

/// System/error log pair shared by the firmware: mirrors diagnostics to
/// the card next to the RTT console so they survive a power cycle.
pub struct LogFiles {
    pub system: RotateLog,
    pub errors: RotateLog,
}

impl LogFiles {
    pub const fn new() -> Self {
        Self {
            system: RotateLog::new("sys", 10_000),
            errors: RotateLog::new("err", 10_000),
        }
    }

    /// Route one diagnostic line; errors land in both files.
    pub fn append<S: BlockStore>(
        &mut self,
        store: &mut S,
        root: &str,
        level: log::Level,
        msg: &str,
    ) {
        if level <= log::Level::Error {
            if let Err(e) = self.errors.write_line(store, root, msg) {
                warn!("error log write failed: {:?}", e);
            }
        }
        if let Err(e) = self.system.write_line(store, root, msg) {
            warn!("system log write failed: {:?}", e);
        }
    }
}

impl Default for LogFiles {
    fn default() -> Self {
        Self::new()
    }
}
