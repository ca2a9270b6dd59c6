use tokio::time::{Duration, Instant};

/// Absolute deadline shared by every downstream call of one auction.
///
/// Computed exactly once when the auction starts; all later stages ask for
/// the remaining budget instead of starting timers of their own, so the
/// deadline cannot drift across sequential stages.
#[derive(Debug, Clone, Copy)]
pub struct GlobalTimeout {
    deadline: Instant,
}

impl GlobalTimeout {
    pub fn create(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    /// Budget left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn has_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
