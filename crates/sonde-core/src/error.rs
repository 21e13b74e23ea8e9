//! Error types shared across the storage engine.

use thiserror_no_std::Error;

/// Storage engine error, generic over the block store adapter's error type.
///
/// Engine functions return these explicitly; nothing in the engine panics.
/// `SeriesFull` is not a failure at engine level — it is the signal that
/// drives file rotation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError<E> {
    /// Header missing, short, or carrying the wrong magic. Treated as
    /// "file absent" by the write path, which recreates the file.
    #[error("header missing or invalid")]
    InvalidHeader,
    /// The batch would cross the end of the data area. Rotation signal.
    #[error("series file is full")]
    SeriesFull,
    /// The store accepted the write but committed zero records.
    #[error("write failed, no records committed")]
    WriteFailed,
    /// Every candidate file index for this device and day is occupied.
    #[error("no free file slot for this day")]
    NoFileSlot,
    /// The device registry has no empty slot left.
    #[error("device registry is full")]
    RegistryFull,
    /// Device id is not present in the registry.
    #[error("unknown device")]
    UnknownDevice,
    /// A formatted path or snapshot exceeded its bounded buffer.
    #[error("formatted output exceeded its buffer")]
    Format,
    /// Error from the block store adapter.
    #[error("block store error")]
    Store(E),
}

/// Returned when the shared storage mutex cannot be acquired within its
/// bounded wait. Surfaced to the caller as "storage busy", never retried
/// inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBusy;
