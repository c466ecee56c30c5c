//! Leading+trailing update throttle.
//!
//! Fires at most once per period, always fires for the first event of a
//! burst (leading edge), and always fires once more after the last event of
//! a burst (trailing edge). Pure over injected epoch-ms time so the loop can
//! drive the trailing edge with a tokio sleep and tests stay deterministic.

pub struct UpdateThrottle {
    period_ms: u64,
    last_fire_ms: Option<u64>,
    pending: bool,
}

impl UpdateThrottle {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_fire_ms: None,
            pending: false,
        }
    }

    /// Record an event. Returns `true` if the caller should fire now
    /// (leading edge); otherwise a trailing fire is armed.
    pub fn on_event(&mut self, now_ms: u64) -> bool {
        match self.last_fire_ms {
            Some(last) if now_ms < last.saturating_add(self.period_ms) => {
                self.pending = true;
                false
            }
            _ => {
                self.last_fire_ms = Some(now_ms);
                self.pending = false;
                true
            }
        }
    }

    /// Deadline of the armed trailing fire, if one is pending.
    pub fn trailing_deadline_ms(&self) -> Option<u64> {
        if self.pending {
            Some(self.last_fire_ms.unwrap_or(0).saturating_add(self.period_ms))
        } else {
            None
        }
    }

    /// The trailing timer expired. Returns `true` if the caller should fire.
    pub fn on_deadline(&mut self, now_ms: u64) -> bool {
        if !self.pending {
            return false;
        }
        let due = self
            .last_fire_ms
            .map_or(true, |last| now_ms >= last.saturating_add(self.period_ms));
        if due {
            self.pending = false;
            self.last_fire_ms = Some(now_ms);
        }
        due
    }
}
