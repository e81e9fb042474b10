//! Temporary access window.
//!
//! The buyer gets a bounded window to verify the purchased account before
//! funds are released. `is_active` is a pure function of the stored fields
//! and the caller-supplied clock; it is never persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::TransactionId;

/// Time-limited account access granted to the buyer after funds are held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryAccess {
    pub transaction_id: TransactionId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// First time the buyer actually used the access.
    pub used_at: Option<DateTime<Utc>>,
    pub login_attempts: u32,
    pub max_login_attempts: u32,
    /// Admin kill switch for suspicious activity.
    pub revoked: bool,
    /// Buyer acknowledged the "do not change account details" terms.
    pub terms_acknowledged: bool,
    pub terms_acknowledged_at: Option<DateTime<Utc>>,
}

impl TemporaryAccess {
    pub fn grant(
        transaction_id: TransactionId,
        now: DateTime<Utc>,
        window_hours: i64,
        max_login_attempts: u32,
    ) -> Self {
        Self {
            transaction_id,
            granted_at: now,
            expires_at: now + Duration::hours(window_hours),
            used_at: None,
            login_attempts: 0,
            max_login_attempts,
            revoked: false,
            terms_acknowledged: false,
            terms_acknowledged_at: None,
        }
    }

    /// True iff not revoked, attempts below cap, and `now` is inside
    /// `[granted_at, expires_at]`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        if self.login_attempts >= self.max_login_attempts {
            return false;
        }
        self.granted_at <= now && now <= self.expires_at
    }

    /// Remaining window, clamped at zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        if !self.is_active(now) {
            return Duration::zero();
        }
        std::cmp::max(Duration::zero(), self.expires_at - now)
    }

    /// Count a login attempt; records first use.
    pub fn record_login_attempt(&mut self, now: DateTime<Utc>) {
        self.login_attempts += 1;
        if self.used_at.is_none() {
            self.used_at = Some(now);
        }
    }

    pub fn acknowledge_terms(&mut self, now: DateTime<Utc>) {
        self.terms_acknowledged = true;
        self.terms_acknowledged_at = Some(now);
    }

    pub fn revoke(&mut self) {
        self.revoked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant_at(t: DateTime<Utc>) -> TemporaryAccess {
        TemporaryAccess::grant(TransactionId::new(), t, 48, 10)
    }

    #[test]
    fn test_active_inside_window() {
        let t0 = Utc::now();
        let access = grant_at(t0);
        assert!(access.is_active(t0));
        assert!(access.is_active(t0 + Duration::hours(47)));
        assert!(access.is_active(t0 + Duration::hours(48)));
    }

    #[test]
    fn test_expired_window() {
        // Granted at T, expires T+48h, queried at T+50h.
        let t0 = Utc::now();
        let access = grant_at(t0);
        let later = t0 + Duration::hours(50);
        assert!(!access.is_active(later));
        assert_eq!(access.time_remaining(later), Duration::zero());
    }

    #[test]
    fn test_not_active_before_grant() {
        let t0 = Utc::now();
        let access = grant_at(t0);
        assert!(!access.is_active(t0 - Duration::minutes(1)));
    }

    #[test]
    fn test_revoked_is_inactive() {
        let t0 = Utc::now();
        let mut access = grant_at(t0);
        access.revoke();
        assert!(!access.is_active(t0 + Duration::hours(1)));
    }

    #[test]
    fn test_attempt_cap() {
        let t0 = Utc::now();
        let mut access = grant_at(t0);
        for _ in 0..10 {
            access.record_login_attempt(t0);
        }
        assert!(!access.is_active(t0 + Duration::hours(1)));
        assert_eq!(access.used_at, Some(t0));
    }

    #[test]
    fn test_time_remaining() {
        let t0 = Utc::now();
        let access = grant_at(t0);
        let at = t0 + Duration::hours(40);
        assert_eq!(access.time_remaining(at), Duration::hours(8));
    }
}
