//! Completion cookies
//!
//! Every submitted descriptor gets a positive cookie from its channel's
//! counter. Cookies grow by one per descriptor and wrap from `i32::MAX`
//! back to 1, so 0 and negative values never appear. Completion is answered
//! by placing a cookie against the `(last_completed, last_issued]` window.

use core::fmt;

/// Transfer identifier returned by submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(i32);

impl Cookie {
    /// Smallest valid cookie
    pub const MIN: Cookie = Cookie(1);

    /// Wrap a raw value; non-positive values are not cookies
    pub fn new(value: i32) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }

    /// Cookie that follows this one
    pub fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            n if n > 0 => Self(n),
            _ => Self::MIN,
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion state of a cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStatus {
    /// Transfer finished (or was terminated)
    Complete,
    /// Transfer queued or running
    InProgress,
    /// Cookie was never issued by this channel
    Error,
}

/// Per-channel issue/complete counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookieCounter {
    last_issued: Option<Cookie>,
    last_completed: Option<Cookie>,
}

impl CookieCounter {
    pub const fn new() -> Self {
        Self {
            last_issued: None,
            last_completed: None,
        }
    }

    /// Counter whose next assignment follows `last`
    #[cfg(test)]
    pub(crate) fn resume_after(last: Cookie) -> Self {
        Self {
            last_issued: Some(last),
            last_completed: Some(last),
        }
    }

    /// Hand out the next cookie
    pub fn assign(&mut self) -> Cookie {
        let cookie = self.last_issued.map_or(Cookie::MIN, Cookie::next);
        self.last_issued = Some(cookie);
        cookie
    }

    /// Record that `cookie` has been reaped
    pub fn complete(&mut self, cookie: Cookie) {
        self.last_completed = Some(cookie);
    }

    pub fn last_issued(&self) -> Option<Cookie> {
        self.last_issued
    }

    pub fn last_completed(&self) -> Option<Cookie> {
        self.last_completed
    }

    /// Place `cookie` against the completion window
    pub fn status(&self, cookie: Cookie) -> DmaStatus {
        let Some(used) = self.last_issued.map(Cookie::get) else {
            return DmaStatus::Error;
        };
        let done = self.last_completed.map_or(0, Cookie::get);
        let c = cookie.get();

        if done <= used {
            if c <= done {
                DmaStatus::Complete
            } else if c <= used {
                DmaStatus::InProgress
            } else {
                DmaStatus::Error
            }
        } else if c > used && c <= done {
            // issued side wrapped past i32::MAX, completed side has not yet
            DmaStatus::Complete
        } else {
            DmaStatus::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(v: i32) -> Cookie {
        Cookie::new(v).unwrap()
    }

    #[test]
    fn test_first_cookie_is_one() {
        let mut counter = CookieCounter::new();
        assert_eq!(counter.assign(), cookie(1));
        assert_eq!(counter.assign(), cookie(2));
        assert_eq!(counter.last_issued(), Some(cookie(2)));
        assert_eq!(counter.last_completed(), None);
    }

    #[test]
    fn test_non_positive_values_rejected() {
        assert_eq!(Cookie::new(0), None);
        assert_eq!(Cookie::new(-5), None);
        assert_eq!(Cookie::new(i32::MIN), None);
    }

    #[test]
    fn test_wraps_to_one() {
        assert_eq!(cookie(i32::MAX).next(), Cookie::MIN);

        let mut counter = CookieCounter::resume_after(cookie(i32::MAX - 1));
        assert_eq!(counter.assign(), cookie(i32::MAX));
        assert_eq!(counter.assign(), cookie(1));
        assert_eq!(counter.assign(), cookie(2));
    }

    #[test]
    fn test_monotonic_until_wrap() {
        let mut counter = CookieCounter::new();
        let mut prev = counter.assign();
        for _ in 0..1000 {
            let next = counter.assign();
            assert!(next.get() > prev.get());
            prev = next;
        }
    }

    #[test]
    fn test_status_nothing_issued() {
        let counter = CookieCounter::new();
        assert_eq!(counter.status(cookie(1)), DmaStatus::Error);
    }

    #[test]
    fn test_status_window() {
        let mut counter = CookieCounter::new();
        for _ in 0..5 {
            counter.assign();
        }
        assert_eq!(counter.status(cookie(1)), DmaStatus::InProgress);

        counter.complete(cookie(2));
        assert_eq!(counter.status(cookie(1)), DmaStatus::Complete);
        assert_eq!(counter.status(cookie(2)), DmaStatus::Complete);
        assert_eq!(counter.status(cookie(3)), DmaStatus::InProgress);
        assert_eq!(counter.status(cookie(5)), DmaStatus::InProgress);
        assert_eq!(counter.status(cookie(6)), DmaStatus::Error);
    }

    #[test]
    fn test_status_wrapped_window() {
        let mut counter = CookieCounter::resume_after(cookie(i32::MAX - 2));
        counter.assign(); // MAX - 1
        counter.assign(); // MAX
        counter.assign(); // 1
        counter.assign(); // 2
        counter.complete(cookie(i32::MAX - 1));

        assert_eq!(counter.status(cookie(i32::MAX - 1)), DmaStatus::Complete);
        assert_eq!(counter.status(cookie(i32::MAX - 10)), DmaStatus::Complete);
        assert_eq!(counter.status(cookie(i32::MAX)), DmaStatus::InProgress);
        assert_eq!(counter.status(cookie(1)), DmaStatus::InProgress);
        assert_eq!(counter.status(cookie(2)), DmaStatus::InProgress);
    }
}
