//! Raw field values → semantic transport snapshot
//!
//! Pure mapping, no I/O: identical raw input always yields the identical
//! [`ExternalTransportState`].

use crate::layout::{FlagBits, RawValue};
use serde::Serialize;

/// Sample rate of the external engine's position counters
pub const SAMPLE_RATE: f64 = 44_100.0;

/// Transport state of the external application at one instant
///
/// `loop_start <= loop_end` holds for every decoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ExternalTransportState {
    /// Seconds
    pub play_position: f64,
    /// Multiplier, 1.0 = normal speed
    pub play_rate: f64,
    pub play_state: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub loop_state: bool,
    pub count_in_state: bool,
}

impl ExternalTransportState {
    /// A loop region counts as set once its start is past the origin
    pub fn has_loop_start(&self, epsilon: f64) -> bool {
        self.loop_start > epsilon
    }
}

/// One value per layout field, as read by the probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTransportFields {
    pub position: RawValue,
    pub rate: RawValue,
    pub play_flags: RawValue,
    pub loop_start: RawValue,
    pub loop_end: RawValue,
    pub loop_flags: RawValue,
    pub count_in_flags: RawValue,
}

pub fn samples_to_seconds(samples: f64) -> f64 {
    samples / SAMPLE_RATE
}

fn bit_set(word: RawValue, bit: u8) -> bool {
    u32::from(bit) < u64::BITS && (word.as_word() >> bit) & 1 == 1
}

/// Decode a full set of raw fields
pub fn decode(raw: &RawTransportFields, bits: &FlagBits) -> ExternalTransportState {
    let start = samples_to_seconds(raw.loop_start.as_f64());
    let end = samples_to_seconds(raw.loop_end.as_f64());
    let (loop_start, loop_end) = if start > end { (end, start) } else { (start, end) };

    ExternalTransportState {
        play_position: samples_to_seconds(raw.position.as_f64()),
        play_rate: raw.rate.as_f64(),
        play_state: bit_set(raw.play_flags, bits.play),
        loop_start,
        loop_end,
        loop_state: bit_set(raw.loop_flags, bits.loop_enabled),
        count_in_state: bit_set(raw.count_in_flags, bits.count_in),
    }
}
