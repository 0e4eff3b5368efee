use crate::protocol::Endpoint;

/// The routing state one balancer owns: every configured service endpoint,
/// the prefix of them currently eligible for traffic, and the round-robin
/// cursor.
///
/// Mutated only behind the balancer's mutex. Route selection takes a
/// snapshot and probes outside the lock, then re-acquires it to advance the
/// cursor past whichever candidate won.
#[derive(Debug)]
pub struct WorkerPool {
    all: Vec<Endpoint>,
    active_len: usize,
    next: usize,
}

impl WorkerPool {
    /// A fresh pool routes to every configured service until told otherwise.
    pub fn new(all: Vec<Endpoint>) -> WorkerPool {
        let active_len = all.len();
        WorkerPool {
            all,
            active_len,
            next: 0,
        }
    }

    /// Set the active subset to the first `n` configured services, clamped
    /// to `[0, len(all)]`, and rewind the cursor. Never fails.
    pub fn configure(&mut self, n: i64) {
        self.active_len = n.max(0).min(self.all.len() as i64) as usize;
        self.next = 0;
    }

    pub fn active(&self) -> &[Endpoint] {
        &self.all[..self.active_len]
    }

    /// Snapshot for route selection: the active endpoints and the cursor
    /// position to start probing from.
    pub fn snapshot(&self) -> (Vec<Endpoint>, usize) {
        (self.active().to_vec(), self.next)
    }

    /// Move the cursor just past the slot that was selected, so the next
    /// request starts at its neighbour. `pos` indexes the active prefix.
    pub fn advance_past(&mut self, pos: usize) {
        if self.active_len > 0 && pos < self.active_len {
            self.next = (pos + 1) % self.active_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: u16) -> WorkerPool {
        WorkerPool::new(
            (0..n)
                .map(|i| Endpoint::new("service", 4001 + i))
                .collect(),
        )
    }

    #[test]
    fn starts_fully_active() {
        let p = pool(3);
        assert_eq!(p.active().len(), 3);
    }

    #[test]
    fn configure_clamps_to_pool_size() {
        let mut p = pool(2);
        p.configure(1);
        assert_eq!(p.active().len(), 1);
        p.configure(5);
        assert_eq!(p.active().len(), 2);
        p.configure(0);
        assert!(p.active().is_empty());
        p.configure(-3);
        assert!(p.active().is_empty());
    }

    #[test]
    fn configure_rewinds_cursor() {
        let mut p = pool(4);
        p.advance_past(2);
        p.configure(4);
        let (_, start) = p.snapshot();
        assert_eq!(start, 0);
    }

    #[test]
    fn rotation_visits_each_active_service_once() {
        let mut p = pool(3);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (active, start) = p.snapshot();
            seen.push(active[start].clone());
            p.advance_past(start);
        }
        seen.sort_by_key(|e| e.port);
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn cursor_wraps_around() {
        let mut p = pool(2);
        p.advance_past(1);
        let (_, start) = p.snapshot();
        assert_eq!(start, 0);
    }

    #[test]
    fn advance_past_ignores_stale_position() {
        let mut p = pool(3);
        p.configure(1);
        // Position from a snapshot taken before the reconfiguration.
        p.advance_past(2);
        let (_, start) = p.snapshot();
        assert_eq!(start, 0);
    }
}
