//! `Range` request-header parsing.
//!
//! Only the single-range `bytes=<start>-[<end>]` form is honored. A header
//! that is not shaped like a bytes range at all counts as "no range
//! requested"; a bytes-shaped header with malformed or unsatisfiable numbers
//! yields 416 at the HTTP boundary.

/// Inclusive byte range within a blob of known total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// What a request's `Range` header means against a concrete total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePlan {
    /// No (usable) range was requested; serve the whole payload with 200.
    Full,
    /// Serve this slice with 206.
    Partial(ByteRange),
    /// 416 with `Content-Range: bytes */<total>`.
    Unsatisfiable,
}

pub fn plan(header: Option<&str>, total: u64) -> RangePlan {
    let Some(raw) = header else {
        return RangePlan::Full;
    };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return RangePlan::Full;
    };
    // Multi-range requests are outside the contract; treat like no range.
    if spec.contains(',') {
        return RangePlan::Full;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangePlan::Unsatisfiable;
    };

    let Ok(start) = start_str.trim().parse::<u64>() else {
        return RangePlan::Unsatisfiable;
    };
    if start >= total {
        return RangePlan::Unsatisfiable;
    }

    let end = if end_str.trim().is_empty() {
        total - 1
    } else {
        match end_str.trim().parse::<u64>() {
            Ok(end) => end.min(total - 1),
            Err(_) => return RangePlan::Unsatisfiable,
        }
    };
    if end < start {
        return RangePlan::Unsatisfiable;
    }

    RangePlan::Partial(ByteRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_or_foreign_headers_mean_full() {
        assert_eq!(plan(None, 100), RangePlan::Full);
        assert_eq!(plan(Some("items=0-5"), 100), RangePlan::Full);
        assert_eq!(plan(Some("garbage"), 100), RangePlan::Full);
        assert_eq!(plan(Some("bytes=0-5,10-20"), 100), RangePlan::Full);
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        assert_eq!(
            plan(Some("bytes=10-"), 100),
            RangePlan::Partial(ByteRange::new(10, 99))
        );
    }

    #[test]
    fn end_is_clamped_to_total() {
        assert_eq!(
            plan(Some("bytes=90-1000"), 100),
            RangePlan::Partial(ByteRange::new(90, 99))
        );
    }

    #[test]
    fn malformed_numbers_are_unsatisfiable() {
        assert_eq!(plan(Some("bytes=abc-"), 100), RangePlan::Unsatisfiable);
        assert_eq!(plan(Some("bytes=-"), 100), RangePlan::Unsatisfiable);
        assert_eq!(plan(Some("bytes=-500"), 100), RangePlan::Unsatisfiable);
        assert_eq!(plan(Some("bytes=5-abc"), 100), RangePlan::Unsatisfiable);
        assert_eq!(plan(Some("bytes=9-5"), 100), RangePlan::Unsatisfiable);
    }

    #[test]
    fn start_past_eof_is_unsatisfiable() {
        // A 100-byte file cannot satisfy a start far beyond its end.
        assert_eq!(
            plan(Some("bytes=9999999999-"), 100),
            RangePlan::Unsatisfiable
        );
        assert_eq!(plan(Some("bytes=100-"), 100), RangePlan::Unsatisfiable);
        assert_eq!(plan(Some("bytes=0-"), 0), RangePlan::Unsatisfiable);
    }

    #[test]
    fn single_byte_range() {
        assert_eq!(
            plan(Some("bytes=42-42"), 100),
            RangePlan::Partial(ByteRange::new(42, 42))
        );
        assert_eq!(plan(Some("bytes=42-42"), 100), plan(Some(" bytes=42-42 "), 100));
    }
}
