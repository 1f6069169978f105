use rustix::time::{clock_gettime, ClockId};

/// Monotonic clock reading in nanoseconds.
///
/// Used to stamp flushed frames when the producer passes a zero timestamp,
/// and to evaluate desired-present timestamps on the acquire path.
pub fn now_nanos() -> i64 {
    let ts = clock_gettime(ClockId::Monotonic);
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }
}
