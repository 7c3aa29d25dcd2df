use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_COOLDOWN_DAYS: i64 = 7;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Blocked { remaining: Duration },
}

impl Eligibility {
    /// Remaining wait in whole days, rounded up. `None` when eligible.
    pub fn remaining_days(&self) -> Option<u32> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::Blocked { remaining } => {
                let ms = remaining.num_milliseconds().max(1);
                let days = (ms + DAY_MS - 1) / DAY_MS;
                Some(u32::try_from(days).unwrap_or(u32::MAX))
            }
        }
    }
}

/// Minimum time between two successful renames by the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    window: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_COOLDOWN_DAYS))
    }
}

impl CooldownPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check_eligible(&self, last_rename_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Eligibility {
        let Some(last) = last_rename_at else {
            return Eligibility::Eligible;
        };

        let elapsed = now - last;
        if elapsed >= self.window {
            Eligibility::Eligible
        } else {
            Eligibility::Blocked {
                remaining: self.window - elapsed,
            }
        }
    }

    /// Earliest moment the next rename is allowed, if any restriction applies.
    pub fn next_allowed_at(&self, last_rename_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        last_rename_at.and_then(|last| last.checked_add_signed(self.window))
    }
}
