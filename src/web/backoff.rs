// src/web/backoff.rs - Accept-loop retry delay

/// First delay after a failure, in time units.
pub const BACKOFF_FLOOR: u32 = 1;
/// Largest delay, in time units.
pub const BACKOFF_CEILING: u32 = 120;

/// Exponential backoff over abstract time units: 1, 2, 4 … 64, 120, 120 …
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { current: BACKOFF_FLOOR }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay to wait now; doubles the next one up to the ceiling.
    pub fn next_delay(&mut self) -> u32 {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(BACKOFF_CEILING);
        delay
    }

    /// Called after a successful accept.
    pub fn reset(&mut self) {
        self.current = BACKOFF_FLOOR;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_then_caps() {
        let mut backoff = Backoff::new();
        let delays: Vec<u32> = (0..10).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120, 120]);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::new();
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), 1);
        assert_eq!(backoff.next_delay(), 2);
    }
}
