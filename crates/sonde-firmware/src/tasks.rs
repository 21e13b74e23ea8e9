//! Embassy tasks and shared state driving the storage engine.
//!
//! One periodic producer task owns the sample → buffer → aggregate → append
//! cycle; request handlers (driven by the radio link's server task) reach
//! the same engine through the single storage mutex with a bounded wait.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Ticker};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::Output;
use esp_hal::spi::master::Spi;
use log::{error, warn};

use sonde_core::clock::date_from_epoch;
use sonde_core::error::StorageBusy;
use sonde_core::shared::{lock_storage, SharedEngine};
use sonde_core::storage::{Engine, ReadWindow, Record};
use sonde_core::textlog::LogFiles;

use core::str::FromStr;

use crate::sd_store::SdStore;
use crate::time_sync::{self, ClockSource};

/// Sample intake queue depth; sized for a burst of link frames between two
/// producer ticks.
pub const SAMPLE_QUEUE_DEPTH: usize = 16;

/// Producer tick driving intake draining and the aggregation cycle.
pub const PRODUCER_TICK: Duration = Duration::from_secs(1);

pub type SdSpiDevice = ExclusiveDevice<Spi<'static, esp_hal::Blocking>, Output<'static>, NoDelay>;
pub type HubStore = SdStore<SdSpiDevice, Delay, ClockSource>;
pub type HubEngine = Engine<HubStore>;
pub type SharedStorage = SharedEngine<HubStore>;

/// The engine behind the one storage mutex. `None` until `main` brings the
/// card up.
pub static STORAGE: SharedStorage = SharedEngine::new(None);

/// One sample as delivered by the radio link task.
#[derive(Debug, Clone, Copy)]
pub struct IncomingSample {
    pub device_id: u32,
    pub record: Record,
}

/// Intake queue from the link task to the producer. A full queue drops the
/// frame at the sender; backpressure is never absorbed by storage.
pub static SAMPLE_CHANNEL: Channel<CriticalSectionRawMutex, IncomingSample, SAMPLE_QUEUE_DEPTH> =
    Channel::new();

/// Periodic producer: drains the intake queue into per-device rings and
/// runs the engine cycle. Idles until the wall clock is anchored so no
/// record ever carries a made-up timestamp.
#[embassy_executor::task]
pub async fn storage_task(tz_offset_secs: i32) {
    let mut ticker = Ticker::every(PRODUCER_TICK);
    loop {
        ticker.next().await;

        let now = time_sync::now_epoch();
        if now == 0 {
            continue;
        }

        let Ok(mut guard) = lock_storage(&STORAGE).await else {
            // A slow reader holds the lock; this tick's work waits in the
            // rings and the intake queue.
            warn!("storage busy, skipping producer tick");
            continue;
        };
        let Some(engine) = guard.as_mut() else {
            continue;
        };

        while let Ok(sample) = SAMPLE_CHANNEL.try_receive() {
            engine.record_sample(sample.device_id, sample.record, now);
        }
        engine.run_cycle(now, date_from_epoch(now, tz_offset_secs));
    }
}

/// Serve a read window to a remote caller. `Err(StorageBusy)` maps to the
/// link's "storage busy" response; it is never retried here.
pub async fn handle_read_window(
    device_id: u32,
    date: sonde_core::clock::Date,
    window: ReadWindow,
    out: &mut [Record],
) -> Result<usize, StorageBusy> {
    let mut guard = lock_storage(&STORAGE).await?;
    let Some(engine) = guard.as_mut() else {
        return Ok(0);
    };
    match engine.read_window(device_id, date, window, out) {
        Ok(n) => Ok(n),
        Err(e) => {
            error!("read window failed for {:08X}: {:?}", device_id, e);
            Ok(0)
        }
    }
}

/// Persist a device config change and snapshot the registry.
pub async fn handle_set_config(device_id: u32, config: u32) -> Result<(), StorageBusy> {
    let mut guard = lock_storage(&STORAGE).await?;
    if let Some(engine) = guard.as_mut() {
        if let Err(e) = engine.set_config(device_id, config, time_sync::now_epoch()) {
            error!("config write failed for {:08X}: {:?}", device_id, e);
        }
    }
    Ok(())
}

/// Registry listing for the server's device index endpoint.
pub async fn handle_list_configs(
    out: &mut heapless::String<512>,
) -> Result<(), StorageBusy> {
    let guard = lock_storage(&STORAGE).await?;
    if let Some(engine) = guard.as_ref() {
        let _ = engine.registry().write_configs_json(out);
    }
    Ok(())
}

/// On-card diagnostic log pair, mirrored next to the RTT console. Always
/// taken after the storage lock, never the other way around.
pub static DIAG_LOG: Mutex<CriticalSectionRawMutex, LogFiles> = Mutex::new(LogFiles::new());

/// Mirror one diagnostic line to the card.
pub async fn log_diag(level: log::Level, msg: &str) -> Result<(), StorageBusy> {
    let mut guard = lock_storage(&STORAGE).await?;
    let Some(engine) = guard.as_mut() else {
        return Ok(());
    };
    let root: heapless::String<16> = heapless::String::from_str(engine.root()).unwrap_or_default();
    DIAG_LOG.lock().await.append(engine.store_mut(), &root, level, msg);
    Ok(())
}

/// Serve the newest diagnostic text to the server's log endpoint.
pub async fn handle_read_log(out: &mut [u8]) -> Result<usize, StorageBusy> {
    let mut guard = lock_storage(&STORAGE).await?;
    let Some(engine) = guard.as_mut() else {
        return Ok(0);
    };
    let root: heapless::String<16> = heapless::String::from_str(engine.root()).unwrap_or_default();
    let diag = DIAG_LOG.lock().await;
    match diag.system.read_latest(engine.store_mut(), &root, out) {
        Ok(n) => Ok(n),
        Err(e) => {
            error!("log read failed: {:?}", e);
            Ok(0)
        }
    }
}
