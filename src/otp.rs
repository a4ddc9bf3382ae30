//! One-time-passcode approval sessions.
//!
//! A session owns one pending reservation and the salted hash of the
//! passcode that approves it. The plaintext is handed out exactly once per
//! issue (start or resend) for delivery and is never stored.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::limits::*;
use crate::model::Reservation;

/// Timing and size knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub length: usize,
    pub ttl: Duration,
    pub max_attempts: u32,
    pub resend_cooldown: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            length: OTP_LENGTH,
            ttl: Duration::seconds(OTP_TTL_SECS),
            max_attempts: OTP_MAX_ATTEMPTS,
            resend_cooldown: Duration::seconds(OTP_RESEND_COOLDOWN_SECS),
        }
    }
}

/// Plaintext passcode on its way to the notification sink.
#[derive(Clone, PartialEq, Eq)]
pub struct Passcode(String);

impl Passcode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Passcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passcode(******)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NotFound,
    Expired,
    Locked,
    Mismatch { attempts_left: u32 },
    /// Input is not a passcode at all. Does not cost an attempt.
    Malformed,
    ResendCooldown { retry_in_secs: i64 },
    CapacityReached { max: usize },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "no session"),
            SessionError::Expired => write!(f, "passcode expired, resend required"),
            SessionError::Locked => write!(f, "locked after too many wrong attempts, resend required"),
            SessionError::Mismatch { attempts_left } => {
                write!(f, "incorrect passcode, attempts left: {attempts_left}")
            }
            SessionError::Malformed => write!(f, "passcode must be digits only"),
            SessionError::ResendCooldown { retry_in_secs } => {
                write!(f, "resend available in {retry_in_secs}s")
            }
            SessionError::CapacityReached { max } => {
                write!(f, "approval queue full ({max} pending)")
            }
        }
    }
}

impl std::error::Error for SessionError {}

pub struct OtpSession {
    salt: [u8; OTP_SALT_LEN],
    hash: [u8; 32],
    pub expires_at: DateTime<Utc>,
    pub attempts_left: u32,
    pub resend_at: DateTime<Utc>,
    pub verified: bool,
    pub approver: String,
    pub created_at: DateTime<Utc>,
    pending: Reservation,
    policy: OtpPolicy,
}

impl std::fmt::Debug for OtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpSession")
            .field("expires_at", &self.expires_at)
            .field("attempts_left", &self.attempts_left)
            .field("resend_at", &self.resend_at)
            .field("verified", &self.verified)
            .field("approver", &self.approver)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl OtpSession {
    /// Open a session for `pending`. Returns the plaintext for one delivery.
    pub fn start(
        pending: Reservation,
        approver: &str,
        now: DateTime<Utc>,
        policy: OtpPolicy,
    ) -> (Self, Passcode) {
        let mut session = Self {
            salt: [0; OTP_SALT_LEN],
            hash: [0; 32],
            expires_at: now,
            attempts_left: 0,
            resend_at: now,
            verified: false,
            approver: approver.to_string(),
            created_at: now,
            pending,
            policy,
        };
        let code = session.issue(now);
        (session, code)
    }

    /// Rotate passcode, salt and hash. Resets expiry, attempts and cooldown.
    /// The cooldown is the caller's to enforce (see [`OtpSession::can_resend`]).
    /// The new passcode never matches the one it replaces.
    pub fn resend(&mut self, now: DateTime<Utc>) -> Passcode {
        let (old_salt, old_hash) = (self.salt, self.hash);
        loop {
            let code = self.issue(now);
            let repeat = digest(&old_salt, code.as_str());
            if self.policy.length == 0 || !bool::from(repeat[..].ct_eq(&old_hash[..])) {
                return code;
            }
        }
    }

    fn issue(&mut self, now: DateTime<Utc>) -> Passcode {
        let code = random_passcode(self.policy.length);
        OsRng.fill_bytes(&mut self.salt);
        self.hash = digest(&self.salt, code.as_str());
        self.expires_at = now + self.policy.ttl;
        self.attempts_left = self.policy.max_attempts;
        self.resend_at = now + self.policy.resend_cooldown;
        self.verified = false;
        code
    }

    pub fn verify(&mut self, candidate: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.is_expired(now) {
            return Err(SessionError::Expired);
        }
        // Verified stays verified until expiry; a retry after a failed
        // commit does not need the passcode again.
        if self.verified {
            return Ok(());
        }
        if self.attempts_left == 0 {
            return Err(SessionError::Locked);
        }
        let candidate = candidate.trim();
        if candidate.len() != self.policy.length || !candidate.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::Malformed);
        }

        let computed = digest(&self.salt, candidate);
        if bool::from(computed[..].ct_eq(&self.hash[..])) {
            self.verified = true;
            return Ok(());
        }

        self.attempts_left -= 1;
        if self.attempts_left == 0 {
            Err(SessionError::Locked)
        } else {
            Err(SessionError::Mismatch {
                attempts_left: self.attempts_left,
            })
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn can_resend(&self, now: DateTime<Utc>) -> bool {
        now >= self.resend_at
    }

    /// Expired and left alone for longer than `grace`: nobody is coming back for it.
    pub fn is_abandoned(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now > self.expires_at + grace
    }

    pub fn pending(&self) -> &Reservation {
        &self.pending
    }
}

fn random_passcode(length: usize) -> Passcode {
    let code = (0..length)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect();
    Passcode(code)
}

fn digest(salt: &[u8], code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}
