pub use std::time::Duration;

use chrono::Utc;

pub type DateTime = chrono::DateTime<Utc>;

pub fn now() -> DateTime {
    Utc::now()
}

pub trait DateTimeExt {
    /// Returns the amount of time elapsed since this datetime was created.
    fn elapsed(self) -> Duration;
    /// Returns the amount of time elapsed from another datetime to this one,
    /// or zero duration if that instant is later than this one.
    fn duration_since(self, earlier: DateTime) -> Duration;
    /// This datetime plus a `std::time::Duration` (chrono only overloads
    /// `Add` for its own `chrono::Duration`, so this bridges the two).
    fn plus(self, d: Duration) -> DateTime;
}

impl DateTimeExt for DateTime {
    fn elapsed(self) -> Duration {
        now().duration_since(self)
    }

    fn duration_since(self, earlier: DateTime) -> Duration {
        self.signed_duration_since(earlier)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn plus(self, d: Duration) -> DateTime {
        self + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

pub trait DateTimeFormatExt {
    fn rfc3339(&self) -> String;
    fn rfc3339_nano(&self) -> String;
}

impl DateTimeFormatExt for DateTime {
    fn rfc3339(&self) -> String {
        self.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    fn rfc3339_nano(&self) -> String {
        self.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic_nondecreasing() {
        let t0 = now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(t0.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn duration_since_is_nonnegative_for_later_self() {
        let earlier = now();
        std::thread::sleep(Duration::from_millis(2));
        let later = now();
        assert!(later.duration_since(earlier) > Duration::ZERO);
    }

    #[test]
    fn plus_moves_forward_by_the_given_duration() {
        let t0 = now();
        let t1 = t0.plus(Duration::from_secs(30));
        assert!(t1.duration_since(t0) >= Duration::from_secs(29));
    }
}
