use std::sync::atomic::{AtomicU32, Ordering};

static SEQUENCE_COUNTER: AtomicU32 = AtomicU32::new(0);
static QUEUE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns the next process-unique buffer sequence number.
///
/// Sequence numbers are assigned monotonically at buffer construction and
/// identify a slot for the lifetime of the cache entry, across reallocation.
pub fn next_sequence() -> u32 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Returns the next process-global queue id: `pid << 32 | counter`.
///
/// The high half makes ids unique across processes so they can key the
/// process-wide surface registry even after traveling over IPC.
pub fn next_unique_id() -> u64 {
    let pid = std::process::id() as u64;
    let counter = QUEUE_COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    (pid << 32) | counter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_monotonic() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }

    #[test]
    fn unique_ids_embed_the_pid() {
        let id = next_unique_id();
        assert_eq!((id >> 32) as u32, std::process::id());
        assert_ne!(id, next_unique_id());
    }
}
