//! Segment planning for multi-part transfers.
//!
//! A transfer larger than one part is split into an ordered run of
//! contiguous byte ranges.  Each range becomes one backend sub-request
//! (an uploaded part or a ranged download).

use std::ops::Range;

use crate::config::TransferConfig;

/// One contiguous byte range of a transfer.  `end` is inclusive, so the
/// range `bytes=start-end` can be handed to the backend as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    /// Number of bytes covered by this segment.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false // a segment always covers at least one byte
    }

    /// Index range of this segment within a buffer whose first byte
    /// corresponds to transfer offset `base`.
    pub fn buf_range(&self, base: u64) -> Range<usize> {
        let lo = (self.start - base) as usize;
        lo..lo + self.len() as usize
    }
}

/// Plan the segments covering `[start, start + size)`.
///
/// Uses `default_part_size` unless that would exceed `max_part_count`
/// parts, in which case the part size is recomputed (ceiling division, so
/// the count bound holds for any size) and asserted to lie strictly
/// between the backend's minimum and maximum part sizes.  A request that
/// violates that assertion is too large for the configured limits; this
/// is a configuration defect, not a retryable condition.
///
/// `size == 0` yields an empty plan; callers special-case zero-length
/// transfers before reaching for multi-part machinery.
pub fn plan_segments(start: u64, size: u64, config: &TransferConfig) -> Vec<Segment> {
    if size == 0 {
        return Vec::new();
    }

    let mut part_size = config.default_part_size;
    if size.div_ceil(config.default_part_size) > config.max_part_count {
        part_size = size.div_ceil(config.max_part_count);
        assert!(
            part_size > config.min_part_size && part_size < config.max_part_size,
            "request of {} bytes does not fit the configured limits \
             (min {} max {} default {} recomputed part size {})",
            size,
            config.min_part_size,
            config.max_part_size,
            config.default_part_size,
            part_size,
        );
    }

    let limit = start + size;
    let mut segments = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut pos = start;
    while pos < limit {
        let stop = std::cmp::min(pos + part_size, limit);
        segments.push(Segment {
            start: pos,
            end: stop - 1,
        });
        pos = stop;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TransferConfig {
        // Shrunk limits so tests do not allocate gigabytes.
        TransferConfig {
            min_part_size: 8,
            default_part_size: 16,
            max_part_size: 1024,
            max_part_count: 10,
            ..TransferConfig::default()
        }
    }

    fn assert_covers(segments: &[Segment], start: u64, size: u64) {
        assert_eq!(segments.first().unwrap().start, start);
        assert_eq!(segments.last().unwrap().end, start + size - 1);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1, "gap or overlap");
        }
    }

    #[test]
    fn zero_size_plans_nothing() {
        assert!(plan_segments(0, 0, &small_config()).is_empty());
    }

    #[test]
    fn single_part_when_under_default() {
        let segs = plan_segments(0, 10, &small_config());
        assert_eq!(segs, vec![Segment { start: 0, end: 9 }]);
        assert_eq!(segs[0].len(), 10);
    }

    #[test]
    fn exact_multiple_of_part_size() {
        let segs = plan_segments(0, 48, &small_config());
        assert_eq!(segs.len(), 3);
        assert_covers(&segs, 0, 48);
        assert!(segs.iter().all(|s| s.len() == 16));
    }

    #[test]
    fn last_part_is_the_remainder() {
        let segs = plan_segments(0, 50, &small_config());
        assert_eq!(segs.len(), 4);
        assert_covers(&segs, 0, 50);
        assert_eq!(segs.last().unwrap().len(), 2);
    }

    #[test]
    fn nonzero_start_offsets_every_segment() {
        let segs = plan_segments(100, 40, &small_config());
        assert_covers(&segs, 100, 40);
        assert_eq!(segs[0].buf_range(100), 0..16);
        assert_eq!(segs[1].buf_range(100), 16..32);
    }

    #[test]
    fn oversize_recomputes_part_size_within_count_bound() {
        let cfg = small_config();
        // The default part size would need 21 parts against a cap of 10.
        let segs = plan_segments(0, 321, &cfg);
        assert!(segs.len() as u64 <= cfg.max_part_count, "{} parts", segs.len());
        assert_covers(&segs, 0, 321);
    }

    #[test]
    fn count_bound_holds_across_awkward_sizes() {
        let cfg = small_config();
        for size in [161, 168, 169, 170, 179, 250, 319, 320, 321, 1000] {
            let segs = plan_segments(0, size, &cfg);
            assert!(
                segs.len() as u64 <= cfg.max_part_count,
                "size {} -> {} parts",
                size,
                segs.len()
            );
            assert_covers(&segs, 0, size);
        }
    }

    #[test]
    #[should_panic(expected = "does not fit the configured limits")]
    fn unsatisfiable_request_panics() {
        let cfg = TransferConfig {
            min_part_size: 8,
            default_part_size: 16,
            max_part_size: 32, // recomputed size will exceed this
            max_part_count: 4,
            ..TransferConfig::default()
        };
        plan_segments(0, 10_000, &cfg);
    }
}
