//! Bounded device registry.
//!
//! A fixed arena of per-device slots: sample ring, aggregate cache, opaque
//! config, cached route and header, last-seen bookkeeping. Slots are claimed
//! on first contact and never reclaimed for the process lifetime; the whole
//! table is snapshotted to a small text file and rehydrated at boot.

use core::fmt::{self, Write};

use log::{info, warn};

use super::cache::AggregateCache;
use super::header::FileHeader;
use super::ring::SampleRing;
use super::rotation::Route;
use super::MAX_DEVICES;

/// Upper bound for the encoded snapshot (and its read buffer).
pub const SNAPSHOT_MAX: usize = 512;

/// Everything the engine tracks for one device.
#[derive(Debug, Clone)]
pub struct DeviceSlot {
    pub device_id: u32,
    /// Opaque sampling/aggregation flags owned by the caller. Zero means
    /// "unconfigured": samples are buffered but nothing is persisted.
    pub config: u32,
    pub last_aggregate_time: u32,
    pub last_seen_time: u32,
    /// Cached append destination; `None` forces re-resolution.
    pub route: Option<Route>,
    /// Header of the current data file, cached so steady-state appends skip
    /// the ensure-file probe.
    pub header: Option<FileHeader>,
    pub ring: SampleRing,
    pub cache: AggregateCache,
}

impl DeviceSlot {
    fn new(device_id: u32, now: u32) -> Self {
        Self {
            device_id,
            config: 0,
            last_aggregate_time: 0,
            last_seen_time: now,
            route: None,
            header: None,
            ring: SampleRing::new(),
            cache: AggregateCache::new(),
        }
    }
}

/// Arena of device slots with stable indices.
#[derive(Debug)]
pub struct Registry<const N: usize = { MAX_DEVICES }> {
    slots: heapless::Vec<DeviceSlot, N>,
}

impl<const N: usize> Registry<N> {
    pub const fn new() -> Self {
        Self {
            slots: heapless::Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&DeviceSlot> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut DeviceSlot> {
        self.slots.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSlot> {
        self.slots.iter()
    }

    pub fn find(&self, device_id: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.device_id == device_id)
    }

    /// Return the slot index for `device_id`, claiming the first empty slot
    /// for an unseen id. `None` (logged) when the arena is full — the device
    /// is dropped, not evicted in favor of another.
    pub fn find_or_create(&mut self, device_id: u32, now: u32) -> Option<usize> {
        if let Some(slot) = self.find(device_id) {
            return Some(slot);
        }
        if self.slots.push(DeviceSlot::new(device_id, now)).is_err() {
            warn!("registry full ({} slots), dropping {:08X}", N, device_id);
            return None;
        }
        Some(self.slots.len() - 1)
    }

    /// Encode the snapshot: one `<device-id-hex8> <config-decimal>` line per
    /// configured device. Unconfigured devices are transient and not
    /// persisted.
    pub fn encode_snapshot<const M: usize>(
        &self,
        out: &mut heapless::String<M>,
    ) -> fmt::Result {
        for slot in self.slots.iter() {
            if slot.device_id == 0 || slot.config == 0 {
                continue;
            }
            writeln!(out, "{:08X} {}", slot.device_id, slot.config)?;
        }
        Ok(())
    }

    /// Rehydrate from snapshot text. Malformed lines and zero ids/configs
    /// are skipped; devices beyond the arena capacity are counted and
    /// logged, never written past the bound. Returns the devices loaded.
    pub fn load_snapshot(&mut self, text: &str, now: u32) -> usize {
        let mut loaded = 0usize;
        let mut dropped = 0usize;

        for line in text.lines() {
            let Some((id_part, config_part)) = line.split_once(' ') else {
                continue;
            };
            let Ok(device_id) = u32::from_str_radix(id_part, 16) else {
                continue;
            };
            let Ok(config) = config_part.trim_end().parse::<u32>() else {
                continue;
            };
            if device_id == 0 || config == 0 {
                continue;
            }

            match self.find_or_create(device_id, now) {
                Some(slot) => {
                    self.slots[slot].config = config;
                    loaded += 1;
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!("registry snapshot overflow, {} devices dropped", dropped);
        }
        info!("loaded {} device configs", loaded);
        loaded
    }

    /// Serialize configured devices as `[["<hex8>",<config>], ...]` for the
    /// request server.
    pub fn write_configs_json<const M: usize>(
        &self,
        out: &mut heapless::String<M>,
    ) -> fmt::Result {
        out.write_char('[')?;
        let mut first = true;
        for slot in self.slots.iter() {
            if slot.device_id == 0 || slot.config == 0 {
                continue;
            }
            if !first {
                out.write_char(',')?;
            }
            write!(out, "[\"{:08X}\",{}]", slot.device_id, slot.config)?;
            first = false;
        }
        out.write_char(']')
    }
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_or_create_is_idempotent() {
        let mut registry: Registry<4> = Registry::new();
        let a = registry.find_or_create(0xAABB_CCDD, 100).unwrap();
        let b = registry.find_or_create(0xAABB_CCDD, 200).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_full_registry_drops_new_devices() {
        let mut registry: Registry<2> = Registry::new();
        assert!(registry.find_or_create(1, 0).is_some());
        assert!(registry.find_or_create(2, 0).is_some());
        assert!(registry.find_or_create(3, 0).is_none());
        // Known ids still resolve.
        assert_eq!(registry.find_or_create(1, 0), Some(0));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut registry: Registry<4> = Registry::new();
        let a = registry.find_or_create(0xAABB_CCDD, 0).unwrap();
        registry.get_mut(a).unwrap().config = 3;
        let b = registry.find_or_create(0x0000_0042, 0).unwrap();
        registry.get_mut(b).unwrap().config = 17;
        // Unconfigured device stays out of the snapshot.
        registry.find_or_create(0x1111_1111, 0).unwrap();

        let mut text = heapless::String::<SNAPSHOT_MAX>::new();
        registry.encode_snapshot(&mut text).unwrap();
        assert_eq!(text.as_str(), "AABBCCDD 3\n00000042 17\n");

        let mut restored: Registry<4> = Registry::new();
        assert_eq!(restored.load_snapshot(&text, 500), 2);
        let slot = restored.get(restored.find(0xAABB_CCDD).unwrap()).unwrap();
        assert_eq!(slot.config, 3);
    }

    #[test]
    fn test_snapshot_overflow_registers_capacity_only() {
        // 12 snapshot lines into a 10-slot registry: exactly 10 register,
        // nothing is written past the arena bound.
        let mut text = heapless::String::<SNAPSHOT_MAX>::new();
        for i in 1..=12u32 {
            writeln!(text, "{:08X} {}", i, i).unwrap();
        }

        let mut registry: Registry<10> = Registry::new();
        assert_eq!(registry.load_snapshot(&text, 0), 10);
        assert_eq!(registry.len(), 10);
        assert!(registry.find(11).is_none());
    }

    #[test]
    fn test_snapshot_skips_malformed_lines() {
        let text = "AABBCCDD 3\nnot a line\nZZZZZZZZ 9\n00000000 5\n00000007 0\n00000042 17\n";
        let mut registry: Registry<8> = Registry::new();
        assert_eq!(registry.load_snapshot(text, 0), 2);
        assert!(registry.find(0xAABB_CCDD).is_some());
        assert!(registry.find(0x42).is_some());
    }

    #[test]
    fn test_configs_json() {
        let mut registry: Registry<4> = Registry::new();
        let a = registry.find_or_create(0xAABB_CCDD, 0).unwrap();
        registry.get_mut(a).unwrap().config = 3;

        let mut out = heapless::String::<128>::new();
        registry.write_configs_json(&mut out).unwrap();
        assert_eq!(out.as_str(), "[[\"AABBCCDD\",3]]");
    }
}
