//! ESP32-S3 firmware-specific modules for sonde-rs
//!
//! This crate contains hardware-specific code that cannot compile on
//! desktop targets: peripheral bring-up, the SD-card block store adapter,
//! the embassy tasks driving the storage engine, and wall-clock anchoring.

#![no_std]

extern crate alloc;

pub mod sd_store;
pub mod settings;
pub mod tasks;
pub mod time_sync;
