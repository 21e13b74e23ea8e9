//! Engine facade: owns the block store, the registry, and the per-device
//! buffers, and drives the produce/aggregate/append cycle.
//!
//! In-memory state is owned exclusively by whoever holds the engine — the
//! firmware wraps it in a single shared mutex (see [`crate::shared`]), so
//! the producer task and request handlers never touch storage concurrently.

use core::str::FromStr;

use log::{error, info, warn};

use crate::clock::Date;
use crate::error::StorageError;
use crate::store::BlockStore;

use super::record::Record;
use super::registry::{DeviceSlot, Registry, SNAPSHOT_MAX};
use super::rotation::{self, Route};
use super::series_file;
use super::{ReadWindow, AGGREGATE_OUTPUTS, AGGREGATE_PERIOD_SECS, MAX_DAY_FILES, MAX_DEVICES};

/// Storage root prefix (the platform mount point, e.g. `/sdcard`).
pub type RootPath = heapless::String<16>;

pub struct Engine<S: BlockStore, const N: usize = { MAX_DEVICES }> {
    store: S,
    registry: Registry<N>,
    root: RootPath,
}

impl<S: BlockStore, const N: usize> Engine<S, N> {
    pub fn new(store: S, root: &str) -> Result<Self, StorageError<S::Error>> {
        Ok(Self {
            store,
            registry: Registry::new(),
            root: RootPath::from_str(root).map_err(|_| StorageError::Format)?,
        })
    }

    pub fn registry(&self) -> &Registry<N> {
        &self.registry
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Buffer one incoming sample. Unseen devices claim a registry slot;
    /// when the arena is full the sample is dropped (already logged by the
    /// registry).
    pub fn record_sample(&mut self, device_id: u32, record: Record, now: u32) {
        let Some(slot) = self.registry.find_or_create(device_id, now) else {
            return;
        };
        let Some(slot) = self.registry.get_mut(slot) else {
            return;
        };
        slot.ring.push(record);
        slot.last_seen_time = now;
    }

    /// Run one producer cycle: devices are visited in registry-slot order,
    /// and each device due for aggregation gets its pending samples
    /// condensed and appended. A failing device is logged, its cached route
    /// cleared for re-resolution, and the cycle moves on — one slow or
    /// broken path cannot starve the others beyond this tick.
    pub fn run_cycle(&mut self, now: u32, date: Date) {
        for index in 0..self.registry.len() {
            let Some(slot) = self.registry.get_mut(index) else {
                break;
            };
            let device_id = slot.device_id;
            let result = Self::device_cycle(&mut self.store, &self.root, slot, now, date);
            if let Err(e) = result {
                error!("device {:08X} cycle failed: {:?}", device_id, e);
                if let Some(slot) = self.registry.get_mut(index) {
                    slot.route = None;
                    slot.header = None;
                }
            }
        }
    }

    fn device_cycle(
        store: &mut S,
        root: &str,
        slot: &mut DeviceSlot,
        now: u32,
        date: Date,
    ) -> Result<(), StorageError<S::Error>> {
        if slot.last_aggregate_time != 0
            && now.saturating_sub(slot.last_aggregate_time) < AGGREGATE_PERIOD_SECS
        {
            return Ok(());
        }
        // Unconfigured devices only buffer; nothing is persisted for them.
        if slot.config == 0 || slot.ring.pending() == 0 {
            slot.last_aggregate_time = now;
            return Ok(());
        }

        // Aggregates not committed below are dropped for this tick; the
        // next cycle starts from fresh samples.
        slot.last_aggregate_time = now;
        let mut outputs = [Record::EMPTY; AGGREGATE_OUTPUTS];
        let produced = slot.ring.aggregate(AGGREGATE_OUTPUTS, &mut outputs);
        if produced == 0 {
            return Ok(());
        }
        let batch = &outputs[..produced];

        let mut route = rotation::resolve(store, root, slot.device_id, date, slot.route)?;
        if slot.route != Some(route) {
            slot.header = None;
        }

        let path = rotation::data_file(root, slot.device_id, &route).ok_or(StorageError::Format)?;
        let mut header = match slot.header {
            Some(header) => header,
            None => series_file::ensure_file(store, &path)?,
        };

        match series_file::batch_insert(store, &path, &mut header, batch) {
            Ok(_) => {}
            Err(StorageError::SeriesFull) => {
                // Capacity exhausted: advance the index once and land the
                // same batch in the fresh file.
                route = rotation::advance_on_full(route).ok_or(StorageError::NoFileSlot)?;
                let path =
                    rotation::data_file(root, slot.device_id, &route).ok_or(StorageError::Format)?;
                header = series_file::ensure_file(store, &path)?;
                series_file::batch_insert(store, &path, &mut header, batch)?;
            }
            Err(e) => return Err(e),
        }

        slot.route = Some(route);
        slot.header = Some(header);
        for record in batch {
            slot.cache.push(*record);
        }
        Ok(())
    }

    /// Update a device's config and rewrite the snapshot. Config changes
    /// are infrequent manual actions, so the whole-file rewrite is fine.
    pub fn set_config(
        &mut self,
        device_id: u32,
        config: u32,
        now: u32,
    ) -> Result<(), StorageError<S::Error>> {
        let slot = self
            .registry
            .find_or_create(device_id, now)
            .ok_or(StorageError::RegistryFull)?;
        if let Some(slot) = self.registry.get_mut(slot) {
            slot.config = config;
        }
        self.persist_registry()
    }

    /// Rewrite `<root>/log/config.txt` from the current registry.
    pub fn persist_registry(&mut self) -> Result<(), StorageError<S::Error>> {
        let mut text = heapless::String::<SNAPSHOT_MAX>::new();
        self.registry
            .encode_snapshot(&mut text)
            .map_err(|_| StorageError::Format)?;

        let dir = rotation::log_dir(&self.root).ok_or(StorageError::Format)?;
        self.store.ensure_dir(&dir).map_err(StorageError::Store)?;
        let path = rotation::config_file(&self.root).ok_or(StorageError::Format)?;
        self.store
            .overwrite(&path, text.as_bytes())
            .map_err(StorageError::Store)?;
        info!("registry snapshot written ({} bytes)", text.len());
        Ok(())
    }

    /// Rehydrate the registry at boot. A missing snapshot is a fresh card,
    /// not an error; unreadable text is logged and skipped.
    pub fn load_registry(&mut self, now: u32) -> Result<usize, StorageError<S::Error>> {
        let path = rotation::config_file(&self.root).ok_or(StorageError::Format)?;
        if self
            .store
            .file_len(&path)
            .map_err(StorageError::Store)?
            .is_none()
        {
            info!("no registry snapshot at {}", path.as_str());
            return Ok(0);
        }

        let mut buf = [0u8; SNAPSHOT_MAX];
        let n = self
            .store
            .read_at(&path, 0, &mut buf)
            .map_err(StorageError::Store)?;
        let Ok(text) = core::str::from_utf8(&buf[..n]) else {
            warn!("registry snapshot is not text, ignoring");
            return Ok(0);
        };
        Ok(self.registry.load_snapshot(text, now))
    }

    /// Serve a read window for one device and day.
    ///
    /// `Recent(n)` comes from the in-RAM aggregate cache; `FullDay` streams
    /// every file persisted for that date, in index order, until the caller
    /// buffer is full.
    pub fn read_window(
        &mut self,
        device_id: u32,
        date: Date,
        window: ReadWindow,
        out: &mut [Record],
    ) -> Result<usize, StorageError<S::Error>> {
        match window {
            ReadWindow::Recent(n) => {
                let slot = self
                    .registry
                    .find(device_id)
                    .ok_or(StorageError::UnknownDevice)?;
                let Some(slot) = self.registry.get(slot) else {
                    return Err(StorageError::UnknownDevice);
                };
                let take = n.min(out.len());
                Ok(slot.cache.recent(&mut out[..take]))
            }
            ReadWindow::FullDay => {
                let mut total = 0usize;
                for file_index in 0..MAX_DAY_FILES {
                    if total >= out.len() {
                        break;
                    }
                    let route = Route {
                        year: date.year,
                        month: date.month,
                        day: date.day,
                        file_index,
                    };
                    let path = rotation::data_file(&self.root, device_id, &route)
                        .ok_or(StorageError::Format)?;
                    if self
                        .store
                        .file_len(&path)
                        .map_err(StorageError::Store)?
                        .is_none()
                    {
                        break;
                    }
                    let (_, n) = series_file::read_all(&mut self.store, &path, &mut out[total..])?;
                    total += n;
                }
                Ok(total)
            }
        }
    }

    /// Newest records for a device and day at or after `cutoff`, read from
    /// the day's last file. Empty when that file predates the cutoff or no
    /// file exists — never extrapolated.
    pub fn tail_since(
        &mut self,
        device_id: u32,
        date: Date,
        cutoff: u32,
        out: &mut [Record],
    ) -> Result<usize, StorageError<S::Error>> {
        let mut newest: Option<rotation::PathBuf> = None;
        for file_index in 0..MAX_DAY_FILES {
            let route = Route {
                year: date.year,
                month: date.month,
                day: date.day,
                file_index,
            };
            let path =
                rotation::data_file(&self.root, device_id, &route).ok_or(StorageError::Format)?;
            if self
                .store
                .file_len(&path)
                .map_err(StorageError::Store)?
                .is_none()
            {
                break;
            }
            newest = Some(path);
        }

        match newest {
            Some(path) => series_file::read_tail_by_time(&mut self.store, &path, cutoff, out),
            None => Ok(0),
        }
    }
}
