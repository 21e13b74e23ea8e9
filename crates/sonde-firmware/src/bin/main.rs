#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::timer::timg::TimerGroup;
use rtt_target::rprintln;

// SD card specific imports
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::spi::master::{Config, Spi};
use log::info;

use sonde_core::storage::Engine;
use sonde_firmware::sd_store::SdStore;
use sonde_firmware::settings::Settings;
use sonde_firmware::tasks::{self, STORAGE};
use sonde_firmware::time_sync::ClockSource;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_print!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    rprintln!("Embassy initialized!");

    // The radio link (sample intake, NTP, request server) lives outside the
    // storage engine; its tasks publish into `tasks::SAMPLE_CHANNEL` and
    // anchor the clock via `time_sync::set_epoch`.
    let radio_init = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    let (mut _wifi_controller, _interfaces) =
        esp_radio::wifi::new(&radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    // Configure and bring up the SD card

    // 1. Configure SPI bus
    let spi_bus = Spi::new(peripherals.SPI2, Config::default())
        .unwrap()
        .with_sck(peripherals.GPIO36)
        .with_mosi(peripherals.GPIO35)
        .with_miso(peripherals.GPIO37);

    // 2. Chip-select pin for the card slot
    let cs = Output::new(peripherals.GPIO34, Level::High, OutputConfig::default());

    // 3. Wrap the SPI bus as a SPI device (required by embedded-hal traits)
    let spi_device = ExclusiveDevice::new_no_delay(spi_bus, cs).unwrap();

    // 4. SD card over SPI, volume manager on top
    let sd_card = SdCard::new(spi_device, embassy_time::Delay);
    let store = SdStore::new(sd_card, ClockSource);

    rprintln!("SD card initialized!");

    // Boot settings from the platform key-value store; defaults when the
    // blob is absent or corrupt.
    let settings = Settings::from_bytes(&[]);

    // Build the engine and rehydrate the device registry from the card.
    let mut engine = Engine::new(store, "").expect("Failed to create storage engine");
    match engine.load_registry(0) {
        Ok(n) => info!("registry rehydrated with {} devices", n),
        Err(e) => info!("registry rehydration skipped: {:?}", e),
    }
    *STORAGE.lock().await = Some(engine);

    spawner
        .spawn(tasks::storage_task(settings.tz_offset_secs()))
        .expect("Failed to spawn storage task");

    loop {
        rprintln!("sonde hub alive");
        Timer::after(Duration::from_secs(60)).await;
    }
}
