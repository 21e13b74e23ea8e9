//! Wall-clock anchoring.
//!
//! The radio link's NTP exchange (outside this crate) calls [`set_epoch`]
//! once time is known; everything else derives epoch seconds from the
//! monotonic embassy clock against that anchor. Until then [`now_epoch`]
//! reports 0 and the storage tasks idle — records are never stamped with a
//! made-up clock.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::Instant;
use embedded_sdmmc::{TimeSource, Timestamp};
use sonde_core::clock::{self, SECONDS_PER_HOUR, SECONDS_PER_MINUTE};

/// Epoch seconds at boot (instant zero); 0 while unsynced.
static EPOCH_ANCHOR: AtomicU32 = AtomicU32::new(0);

pub fn set_epoch(now_epoch: u32) {
    let uptime = Instant::now().as_secs() as u32;
    EPOCH_ANCHOR.store(now_epoch.saturating_sub(uptime), Ordering::Relaxed);
}

pub fn now_epoch() -> u32 {
    let anchor = EPOCH_ANCHOR.load(Ordering::Relaxed);
    if anchor == 0 {
        return 0;
    }
    anchor + Instant::now().as_secs() as u32
}

/// FAT timestamp source for the volume manager, fed from the same anchor.
pub struct ClockSource;

impl TimeSource for ClockSource {
    fn get_timestamp(&self) -> Timestamp {
        let now = now_epoch();
        let date = clock::date_from_epoch(now, 0);
        let secs_of_day = now % clock::SECONDS_PER_DAY;
        Timestamp {
            year_since_1970: (date.year - 1970) as u8,
            zero_indexed_month: date.month - 1,
            zero_indexed_day: date.day - 1,
            hours: (secs_of_day / SECONDS_PER_HOUR) as u8,
            minutes: (secs_of_day % SECONDS_PER_HOUR / SECONDS_PER_MINUTE) as u8,
            seconds: (secs_of_day % SECONDS_PER_MINUTE) as u8,
        }
    }
}
