//! Fixed-length clip timelines for time-based media

use serde::Serialize;

/// One clip of a timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Clip {
    pub start: f64,
    pub stop: f64,
}

/// Upper bound on the clips of one timeline
pub const MAX_CLIPS: usize = 100_000;

/// Number of clips covering `length`, `None` when it would exceed [`MAX_CLIPS`]
///
/// A non-positive (or NaN) length or clip length yields zero clips.
pub fn clip_count(length: f64, clip_length: f64) -> Option<usize> {
    if !(length > 0.0 && clip_length > 0.0) {
        return Some(0);
    }
    let count = (length / clip_length).ceil();
    if !count.is_finite() || count > MAX_CLIPS as f64 {
        return None;
    }
    Some(count as usize)
}

/// Clips covering `[0, length)` in steps of `clip_length`
///
/// The last clip is truncated at `length`. `None` when the timeline would
/// hold more than [`MAX_CLIPS`] clips.
pub fn timeline(length: f64, clip_length: f64) -> Option<Vec<Clip>> {
    let count = clip_count(length, clip_length)?;
    let clips = (0..count)
        .map(|i| {
            let start = i as f64 * clip_length;
            Clip {
                start: round_ms(start),
                stop: round_ms((start + clip_length).min(length)),
            }
        })
        .collect();
    Some(clips)
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
