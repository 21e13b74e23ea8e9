//! Hardware-independent storage engine for sonde-rs
//!
//! This crate contains all platform-agnostic logic for the sonde telemetry
//! hub: the fixed-block series file format, per-device sample rings and
//! aggregation, calendar-keyed file rotation, the bounded device registry,
//! and the read path served to remote callers.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and
//! tests). All storage I/O goes through the [`store::BlockStore`] trait;
//! the firmware crate provides the SD-card implementation.

#![no_std]

extern crate alloc;

pub mod clock;
pub mod error;
pub mod shared;
pub mod storage;
pub mod store;
pub mod textlog;
