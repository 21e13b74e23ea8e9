//! Boot settings handed over by the platform's key-value store.
//!
//! The hub stores a small postcard blob outside the engine; semantics of
//! per-device config words stay with the remote callers.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Settings {
    /// Fixed offset applied before deriving calendar dates for rotation.
    pub tz_offset_minutes: i16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tz_offset_minutes: 0,
        }
    }
}

impl Settings {
    pub fn tz_offset_secs(&self) -> i32 {
        i32::from(self.tz_offset_minutes) * 60
    }

    /// Decode settings from the stored blob; an empty or corrupt blob falls
    /// back to defaults rather than blocking boot.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        postcard::from_bytes(bytes).unwrap_or_default()
    }
}
