//! Simulated time.

/// A clock that only moves when the simulation advances it.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.now_ns / 1_000
    }

    pub fn advance_ns(&mut self, ns: u64) {
        self.now_ns = self.now_ns.saturating_add(ns);
    }

    pub fn advance_us(&mut self, us: u64) {
        self.advance_ns(us.saturating_mul(1_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let mut clock = SimClock::new();
        assert_eq!(clock.now_ns(), 0);
        clock.advance_us(3);
        clock.advance_ns(500);
        assert_eq!(clock.now_ns(), 3_500);
        assert_eq!(clock.now_us(), 3);
        clock.advance_us(1_000);
        assert_eq!(clock.now_us(), 1_003);
    }

    #[test]
    fn test_saturates() {
        let mut clock = SimClock::new();
        clock.advance_ns(u64::MAX);
        clock.advance_us(10);
        assert_eq!(clock.now_ns(), u64::MAX);
    }
}
