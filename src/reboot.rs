//! Reboot scheduler. A pure function of uptime and wall-clock time; no I/O.
//! `parse` handles the `periodic_reboot` key grammar, `fires` is the
//! once-a-minute evaluation.

use chrono::Timelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootPolicy {
    Disabled,
    Daily { hour: u32, minute: u32 },
    /// Interval policy, stored as minutes so overflow can be rejected once
    /// at parse time rather than on every tick.
    Interval { minutes: u64 },
}

impl RebootPolicy {
    pub fn parse(raw: &str) -> RebootPolicy {
        let raw = raw.trim();
        if raw.is_empty() {
            return RebootPolicy::Disabled;
        }

        if let Some((h, m)) = raw.split_once(':') {
            if let (Ok(hour), Ok(minute)) = (h.parse::<u32>(), m.parse::<u32>()) {
                if hour < 24 && minute < 60 {
                    return RebootPolicy::Daily { hour, minute };
                }
            }
            return RebootPolicy::Disabled;
        }

        let (digits, unit) = raw.split_at(raw.len() - 1);
        let (n, minutes_per_unit): (u64, u64) = match unit {
            "h" => (digits.parse().unwrap_or(0), 60),
            "d" => (digits.parse().unwrap_or(0), 60 * 24),
            "w" => (digits.parse().unwrap_or(0), 60 * 24 * 7),
            "m" => (digits.parse().unwrap_or(0), 60 * 24 * 30),
            _ => match raw.parse::<u64>() {
                Ok(n) => (n, 60 * 24),
                Err(_) => return RebootPolicy::Disabled,
            },
        };

        if n == 0 {
            return RebootPolicy::Disabled;
        }
        match n.checked_mul(minutes_per_unit) {
            Some(minutes) if minutes > 0 => RebootPolicy::Interval { minutes },
            _ => RebootPolicy::Disabled,
        }
    }

    /// Evaluate the policy. Caller gates this to once per minute of uptime
    /// (`uptime_s % 60 == 0`); `wall_now` is only consulted for `Daily`.
    pub fn fires(&self, uptime_s: u64, wall_now: u64) -> bool {
        match *self {
            RebootPolicy::Disabled => false,
            RebootPolicy::Daily { hour, minute } => {
                let dt = chrono::DateTime::from_timestamp(wall_now as i64, 0)
                    .unwrap_or_default()
                    .with_timezone(&chrono::Local);
                dt.hour() == hour && dt.minute() == minute
            }
            RebootPolicy::Interval { minutes } => {
                let uptime_minutes = uptime_s / 60;
                uptime_minutes > 0 && uptime_minutes % minutes == 0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily() {
        assert_eq!(
            RebootPolicy::parse("04:00"),
            RebootPolicy::Daily { hour: 4, minute: 0 }
        );
    }

    #[test]
    fn parses_hours_days_weeks_months() {
        assert_eq!(RebootPolicy::parse("2h"), RebootPolicy::Interval { minutes: 120 });
        assert_eq!(RebootPolicy::parse("1d"), RebootPolicy::Interval { minutes: 1440 });
        assert_eq!(RebootPolicy::parse("1w"), RebootPolicy::Interval { minutes: 10080 });
        assert_eq!(RebootPolicy::parse("1m"), RebootPolicy::Interval { minutes: 43200 });
    }

    #[test]
    fn bare_number_is_days() {
        assert_eq!(RebootPolicy::parse("3"), RebootPolicy::Interval { minutes: 4320 });
    }

    #[test]
    fn missing_or_unparsable_is_disabled() {
        assert_eq!(RebootPolicy::parse(""), RebootPolicy::Disabled);
        assert_eq!(RebootPolicy::parse("nonsense"), RebootPolicy::Disabled);
        assert_eq!(RebootPolicy::parse("25:00"), RebootPolicy::Disabled);
        assert_eq!(RebootPolicy::parse("0h"), RebootPolicy::Disabled);
    }

    #[test]
    fn overflow_is_rejected() {
        // u64::MAX days would overflow minutes computation.
        let huge = format!("{}d", u64::MAX);
        assert_eq!(RebootPolicy::parse(&huge), RebootPolicy::Disabled);
    }

    #[test]
    fn interval_fires_on_multiples() {
        let policy = RebootPolicy::Interval { minutes: 30 };
        assert!(!policy.fires(0, 0));
        assert!(!policy.fires(29 * 60, 0));
        assert!(policy.fires(30 * 60, 0));
        assert!(policy.fires(60 * 60, 0));
        assert!(!policy.fires(61 * 60, 0));
    }

    #[test]
    fn daily_fires_at_exact_minute() {
        // Derive hour/minute the same way `fires` does, so the assertion
        // holds under whatever TZ the test runs in.
        let wall_now: u64 = 100_000;
        let local = chrono::DateTime::from_timestamp(wall_now as i64, 0)
            .unwrap()
            .with_timezone(&chrono::Local);
        let policy = RebootPolicy::Daily {
            hour: local.hour(),
            minute: local.minute(),
        };
        assert!(policy.fires(0, wall_now));
        assert!(!policy.fires(0, wall_now + 60));
    }
}
