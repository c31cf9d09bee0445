use std::time::Duration;

use crate::rational::TIME_BASE;

pub const DEFAULT_DTS_DELTA_THRESHOLD: Duration = Duration::from_secs(10);
pub const DEFAULT_DTS_ERROR_THRESHOLD: Duration = Duration::from_secs(108_000);
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Demuxer configuration, resolved once at open time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemuxOptions {
    /// Drop video packets of a session until its first keyframe.
    pub start_with_keyframe: bool,
    /// Jump size treated as a discontinuity on formats that allow timestamp resets.
    pub dts_delta_threshold: Duration,
    /// Jump size after which timestamps are invalidated on continuous formats.
    pub dts_error_threshold: Duration,
    /// Keep source timestamps; only wrap-explained jumps are corrected.
    pub copy_ts: bool,
    /// Bound of every consumer queue.
    pub queue_capacity: usize,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            start_with_keyframe: false,
            dts_delta_threshold: DEFAULT_DTS_DELTA_THRESHOLD,
            dts_error_threshold: DEFAULT_DTS_ERROR_THRESHOLD,
            copy_ts: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DemuxOptions {
    pub fn builder() -> DemuxOptionsBuilder {
        DemuxOptionsBuilder::default()
    }

    pub(crate) fn dts_delta_threshold_us(&self) -> i64 {
        duration_to_us(self.dts_delta_threshold)
    }

    pub(crate) fn dts_error_threshold_us(&self) -> i64 {
        duration_to_us(self.dts_error_threshold)
    }
}

fn duration_to_us(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX / TIME_BASE)
}

#[derive(Default)]
pub struct DemuxOptionsBuilder {
    options: DemuxOptions,
}

impl DemuxOptionsBuilder {
    pub fn start_with_keyframe(mut self, enabled: bool) -> Self {
        self.options.start_with_keyframe = enabled;
        self
    }

    pub fn dts_delta_threshold(mut self, threshold: Duration) -> Self {
        self.options.dts_delta_threshold = threshold;
        self
    }

    pub fn dts_error_threshold(mut self, threshold: Duration) -> Self {
        self.options.dts_error_threshold = threshold;
        self
    }

    pub fn copy_ts(mut self, enabled: bool) -> Self {
        self.options.copy_ts = enabled;
        self
    }

    /// Zero is clamped to one.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.options.queue_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> DemuxOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DemuxOptions::default();
        assert!(!options.start_with_keyframe);
        assert!(!options.copy_ts);
        assert_eq!(options.queue_capacity, 32);
        assert_eq!(options.dts_delta_threshold_us(), 10 * TIME_BASE);
        assert_eq!(options.dts_error_threshold_us(), 108_000 * TIME_BASE);
    }

    #[test]
    fn test_builder() {
        let options = DemuxOptions::builder()
            .start_with_keyframe(true)
            .copy_ts(true)
            .dts_delta_threshold(Duration::from_millis(500))
            .queue_capacity(0)
            .build();
        assert!(options.start_with_keyframe);
        assert!(options.copy_ts);
        assert_eq!(options.dts_delta_threshold_us(), 500_000);
        assert_eq!(options.queue_capacity, 1);
        assert_eq!(options.dts_error_threshold, DEFAULT_DTS_ERROR_THRESHOLD);
    }
}
