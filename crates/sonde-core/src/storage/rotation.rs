//! File rotation keyed by device identity and calendar date.
//!
//! Aggregate files live at `<root>/log/<device-id-hex8>/<yy>/<mmdd>-<i>.bin`.
//! A device writes into one file until the date changes or the file reports
//! full; both advance the per-device route. Paths are built into bounded
//! stack buffers, never allocated.

use core::fmt::Write;

use log::warn;

use crate::clock::Date;
use crate::error::StorageError;
use crate::store::BlockStore;

use super::MAX_DAY_FILES;

/// Bounded path buffer; the deepest path in the scheme fits comfortably.
pub type PathBuf = heapless::String<64>;

/// Cached append destination for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub file_index: u8,
}

impl Route {
    pub const fn matches(&self, date: Date) -> bool {
        self.year == date.year && self.month == date.month && self.day == date.day
    }
}

fn path(args: core::fmt::Arguments<'_>) -> Option<PathBuf> {
    let mut buf = PathBuf::new();
    buf.write_fmt(args).ok()?;
    Some(buf)
}

/// `<root>/log`
pub fn log_dir(root: &str) -> Option<PathBuf> {
    path(format_args!("{}/log", root))
}

/// `<root>/log/<device-id-hex8>`
pub fn device_dir(root: &str, device_id: u32) -> Option<PathBuf> {
    path(format_args!("{}/log/{:08X}", root, device_id))
}

/// `<root>/log/<device-id-hex8>/<yy>`
pub fn year_dir(root: &str, device_id: u32, year: u16) -> Option<PathBuf> {
    path(format_args!(
        "{}/log/{:08X}/{:02}",
        root,
        device_id,
        year % 100
    ))
}

/// `<root>/log/<device-id-hex8>/<yy>/<mmdd>-<i>.bin`
pub fn data_file(root: &str, device_id: u32, route: &Route) -> Option<PathBuf> {
    path(format_args!(
        "{}/log/{:08X}/{:02}/{:02}{:02}-{}.bin",
        root,
        device_id,
        route.year % 100,
        route.month,
        route.day,
        route.file_index
    ))
}

/// `<root>/log/config.txt`
pub fn config_file(root: &str) -> Option<PathBuf> {
    path(format_args!("{}/log/config.txt", root))
}

/// Resolve the append destination for a device on `date`.
///
/// A cached route for the same calendar day is returned untouched. On a
/// date change (or with no cache, e.g. after boot or a self-healing reset)
/// the directory scaffolding is ensured and candidate files are probed by
/// existence; the first missing index wins, but the index never regresses
/// below the previously cached one — slots vacated by out-of-band deletion
/// are intentionally skipped rather than re-filled out of order.
///
/// All `MAX_DAY_FILES` slots occupied is a per-device, per-cycle failure
/// ([`StorageError::NoFileSlot`]); other devices are unaffected.
pub fn resolve<S: BlockStore>(
    store: &mut S,
    root: &str,
    device_id: u32,
    date: Date,
    cached: Option<Route>,
) -> Result<Route, StorageError<S::Error>> {
    if let Some(route) = cached {
        if route.matches(date) {
            return Ok(route);
        }
    }

    for dir in [
        log_dir(root),
        device_dir(root, device_id),
        year_dir(root, device_id, date.year),
    ] {
        let dir = dir.ok_or(StorageError::Format)?;
        store.ensure_dir(&dir).map_err(StorageError::Store)?;
    }

    let floor = cached.map(|route| route.file_index).unwrap_or(0);
    for file_index in floor..MAX_DAY_FILES {
        let route = Route {
            year: date.year,
            month: date.month,
            day: date.day,
            file_index,
        };
        let candidate = data_file(root, device_id, &route).ok_or(StorageError::Format)?;
        if store
            .file_len(&candidate)
            .map_err(StorageError::Store)?
            .is_none()
        {
            return Ok(route);
        }
    }

    warn!(
        "no free file slot for {:08X} on {:02}{:02}",
        device_id, date.month, date.day
    );
    Err(StorageError::NoFileSlot)
}

/// Advance the file index after the append engine reported full. `None`
/// when every slot for the day is used up; independent of the date-change
/// trigger above.
pub fn advance_on_full(route: Route) -> Option<Route> {
    let file_index = route.file_index + 1;
    (file_index < MAX_DAY_FILES).then_some(Route {
        file_index,
        ..route
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBlockStore;

    const DATE: Date = Date {
        year: 2025,
        month: 8,
        day: 7,
    };

    #[test]
    fn test_data_file_path() {
        let route = Route {
            year: 2025,
            month: 8,
            day: 7,
            file_index: 2,
        };
        let path = data_file("/sdcard", 0xAABB_CCDD, &route).unwrap();
        assert_eq!(path.as_str(), "/sdcard/log/AABBCCDD/25/0807-2.bin");
    }

    #[test]
    fn test_resolve_creates_dirs_and_picks_first_free() {
        let mut store = MemBlockStore::new();
        let route = resolve(&mut store, "", 0x1122_3344, DATE, None).unwrap();
        assert_eq!(route.file_index, 0);
        assert!(store.dir_exists("/log"));
        assert!(store.dir_exists("/log/11223344"));
        assert!(store.dir_exists("/log/11223344/25"));
    }

    #[test]
    fn test_resolve_skips_existing_files() {
        let mut store = MemBlockStore::new();
        store
            .overwrite("/log/11223344/25/0807-0.bin", b"x")
            .unwrap();
        store
            .overwrite("/log/11223344/25/0807-1.bin", b"x")
            .unwrap();

        let route = resolve(&mut store, "", 0x1122_3344, DATE, None).unwrap();
        assert_eq!(route.file_index, 2);
    }

    #[test]
    fn test_resolve_keeps_same_day_route() {
        let mut store = MemBlockStore::new();
        let cached = Route {
            year: 2025,
            month: 8,
            day: 7,
            file_index: 3,
        };
        let route = resolve(&mut store, "", 0x1122_3344, DATE, Some(cached)).unwrap();
        assert_eq!(route, cached);
        // No probing, no directory work for a same-day hit.
        assert!(!store.dir_exists("/log"));
    }

    #[test]
    fn test_resolve_never_regresses_below_cached_index() {
        let mut store = MemBlockStore::new();
        let cached = Route {
            year: 2025,
            month: 8,
            day: 6,
            file_index: 4,
        };
        // Day changed; slots 0..4 are free but the index floor holds.
        let route = resolve(&mut store, "", 0x1122_3344, DATE, Some(cached)).unwrap();
        assert_eq!(route.file_index, 4);
        assert_eq!((route.month, route.day), (8, 7));
    }

    #[test]
    fn test_resolve_exhausted_slots() {
        let mut store = MemBlockStore::new();
        for i in 0..MAX_DAY_FILES {
            let name = data_file(
                "",
                0x1122_3344,
                &Route {
                    year: 2025,
                    month: 8,
                    day: 7,
                    file_index: i,
                },
            )
            .unwrap();
            store.overwrite(&name, b"x").unwrap();
        }
        assert_eq!(
            resolve(&mut store, "", 0x1122_3344, DATE, None),
            Err(StorageError::NoFileSlot)
        );
    }

    #[test]
    fn test_advance_on_full() {
        let route = Route {
            year: 2025,
            month: 8,
            day: 7,
            file_index: 0,
        };
        let next = advance_on_full(route).unwrap();
        assert_eq!(next.file_index, 1);
        assert_eq!((next.year, next.month, next.day), (2025, 8, 7));

        let last = Route {
            file_index: MAX_DAY_FILES - 1,
            ..route
        };
        assert_eq!(advance_on_full(last), None);
    }
}
