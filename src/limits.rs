/// Digits in a generated passcode.
pub const OTP_LENGTH: usize = 6;
/// Passcode lifetime in seconds.
pub const OTP_TTL_SECS: i64 = 5 * 60;
/// Wrong guesses allowed before the session locks until resend.
pub const OTP_MAX_ATTEMPTS: u32 = 5;
/// Minimum seconds between a send and the next resend.
pub const OTP_RESEND_COOLDOWN_SECS: i64 = 45;
/// Passcode sends per approver per UTC day.
pub const OTP_DAILY_LIMIT: u32 = 50;
/// Seconds an expired session stays resendable before it is swept.
pub const OTP_ABANDON_GRACE_SECS: i64 = 30 * 60;
/// Random salt bytes per passcode hash.
pub const OTP_SALT_LEN: usize = 16;

/// Concurrent pending approvals held by one workflow.
pub const MAX_PENDING_SESSIONS: usize = 8;
/// Upper bound for a single notification delivery.
pub const DELIVERY_TIMEOUT_SECS: u64 = 15;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_IMPORT_BATCH: usize = 10_000;

/// A booking starting within this many minutes is flagged as starting soon.
pub const STARTING_SOON_MIN: u32 = 15;
