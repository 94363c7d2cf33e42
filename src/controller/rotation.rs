//! # Rotation Scheduler
//!
//! Decides when the serving certificate must be regenerated. Rotation is due
//! once a fixed fraction of the validity window has elapsed, which always lies
//! strictly before expiry, so a fresh certificate is rolled out while the old
//! one is still trusted.

use chrono::{DateTime, Duration, Utc};

/// Validity window of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertValidity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertValidity {
    #[must_use]
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self {
            not_before,
            not_after,
        }
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.not_after - self.not_before
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_after
    }
}

#[derive(Debug, Clone)]
pub struct RotationScheduler {
    validity: Option<CertValidity>,
    refresh_fraction: f64,
}

impl RotationScheduler {
    /// Scheduler for the certificate currently in use, if any
    ///
    /// `refresh_fraction` is clamped into (0, 1).
    #[must_use]
    pub fn new(validity: Option<CertValidity>, refresh_fraction: f64) -> Self {
        let refresh_fraction = if refresh_fraction.is_finite() {
            refresh_fraction.clamp(0.01, 0.99)
        } else {
            crate::constants::DEFAULT_CERT_REFRESH_FRACTION
        };
        Self {
            validity,
            refresh_fraction,
        }
    }

    /// Rotation is due when no certificate exists, the window is malformed,
    /// or the rotation point has been reached
    #[must_use]
    pub fn should_rotate(&self, now: DateTime<Utc>) -> bool {
        match self.next_rotation_at() {
            Some(rotate_at) => now >= rotate_at,
            None => true,
        }
    }

    /// When the current certificate becomes due for rotation
    ///
    /// Returns `None` when there is no usable certificate.
    #[must_use]
    pub fn next_rotation_at(&self) -> Option<DateTime<Utc>> {
        let validity = self.validity.as_ref()?;
        let lifetime = validity.lifetime();
        if lifetime <= Duration::zero() {
            return None;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            reason = "sub-millisecond precision is irrelevant for rotation scheduling"
        )]
        let offset_ms = (lifetime.num_milliseconds() as f64 * self.refresh_fraction) as i64;
        let rotate_at = validity.not_before + Duration::milliseconds(offset_ms);

        if rotate_at >= validity.not_after {
            Some(validity.not_after - Duration::milliseconds(1))
        } else {
            Some(rotate_at)
        }
    }
}
