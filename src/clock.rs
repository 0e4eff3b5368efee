use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as fractional Unix epoch milliseconds.
///
/// Envelope timestamps are produced here once, carried on the wire as text
/// and subtracted from a later reading to compute a round trip. Wall clock
/// rather than a monotonic instant because the stamp crosses process
/// boundaries.
pub fn now_millis() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64() * 1000.0,
        // Clock before the epoch. Treat as zero rather than panicking in a
        // hot path; the sample will be dropped as nonsensical downstream.
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0.0);
        assert!(b >= a);
    }
}
