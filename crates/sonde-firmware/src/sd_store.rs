//! SD-card implementation of the core `BlockStore` trait.
//!
//! SD operations are blocking on the shared SPI bus; the storage mutex in
//! `sonde-core` already serializes every caller, so we raw dog the blocking
//! I/O and keep each call short: open, act, close.

use embedded_sdmmc::{
    Directory, Error, Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager,
};

use sonde_core::store::BlockStore;

type Dir<'a, S, D, T> = Directory<'a, SdCard<S, D>, T, 4, 4, 1>;

/// Block store over a FAT volume on SPI SD card.
pub struct SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
}

/// Split a `/`-separated path into directory components and the final name.
fn split_path(path: &str) -> (heapless::Vec<&str, 8>, &str) {
    let mut parts: heapless::Vec<&str, 8> = heapless::Vec::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        // Paths in the naming scheme are at most four components deep.
        let _ = parts.push(component);
    }
    let name = parts.pop().unwrap_or("");
    (parts, name)
}

/// Walk down the directory components, closing each level as we descend so
/// at most two handles are open at a time.
fn descend<'a, S, D, T>(
    root: Dir<'a, S, D, T>,
    dirs: &[&str],
) -> Result<Dir<'a, S, D, T>, Error<SdCardError>>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    let mut current = root;
    for name in dirs {
        let next = current.open_dir(*name)?;
        current.close()?;
        current = next;
    }
    Ok(current)
}

impl<S, D, T> SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);

        Self { volume_mgr }
    }

    fn open_file_and<R>(
        &mut self,
        path: &str,
        mode: Mode,
        offset: u32,
        op: impl FnOnce(&embedded_sdmmc::File<'_, SdCard<S, D>, T, 4, 4, 1>) -> Result<R, Error<SdCardError>>,
    ) -> Result<R, Error<SdCardError>> {
        let (dirs, name) = split_path(path);
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root = volume.open_root_dir()?;
        let dir = descend(root, &dirs)?;

        let file = dir.open_file_in_dir(name, mode)?;
        if offset != 0 {
            file.seek_from_start(offset)?;
        }
        let result = op(&file)?;

        // Resources are closed on drop (RAII); close explicitly to surface
        // errors.
        file.close()?;
        dir.close()?;
        volume.close()?;
        Ok(result)
    }
}

impl<S, D, T> BlockStore for SdStore<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = Error<SdCardError>;

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.open_file_and(path, Mode::ReadOnly, offset, |file| {
            let mut total = 0;
            while total < buf.len() {
                let n = file.read(&mut buf[total..])?;
                if n == 0 {
                    break; // EOF
                }
                total += n;
            }
            Ok(total)
        })
    }

    fn write_at(&mut self, path: &str, offset: u32, data: &[u8]) -> Result<usize, Self::Error> {
        // Only a zero-offset write may create the file; appends into an
        // absent file must fail so the engine re-resolves its route.
        let mode = if offset == 0 {
            Mode::ReadWriteCreateOrAppend
        } else {
            Mode::ReadWriteAppend
        };
        self.open_file_and(path, mode, offset, |file| {
            if offset == 0 {
                file.seek_from_start(0)?;
            }
            file.write(data)?;
            Ok(data.len())
        })
    }

    fn overwrite(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.open_file_and(path, Mode::ReadWriteCreateOrTruncate, 0, |file| {
            file.write(data)
        })
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u32>, Self::Error> {
        match self.open_file_and(path, Mode::ReadOnly, 0, |file| Ok(file.length())) {
            Ok(len) => Ok(Some(len)),
            // A missing directory level or file both read as "absent".
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ensure_dir(&mut self, path: &str) -> Result<(), Self::Error> {
        let (dirs, name) = split_path(path);
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root = volume.open_root_dir()?;
        let dir = descend(root, &dirs)?;

        let result = match dir.make_dir_in_dir(name) {
            Ok(()) | Err(Error::FileAlreadyExists) => Ok(()),
            Err(e) => Err(e),
        };
        dir.close()?;
        volume.close()?;
        result
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        let (dirs, name) = split_path(path);
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root = volume.open_root_dir()?;
        let dir = descend(root, &dirs)?;

        let result = dir.delete_file_in_dir(name);
        dir.close()?;
        volume.close()?;
        result
    }
}
