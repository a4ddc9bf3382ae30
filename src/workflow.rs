//! Booking orchestration: direct commit for ordinary rooms, request →
//! passcode → approval for gated ones.
//!
//! Pending approvals live in a registry keyed by session id. Every
//! start/verify/resend/clear touches the registry inside one lock; the
//! notification sink is only ever called with that lock released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::ConfigError;
use crate::engine::{Engine, EngineError, ValidationError};
use crate::limits::*;
use crate::mailer::{DeliveryError, NotificationSink, is_email};
use crate::model::*;
use crate::otp::{OtpPolicy, OtpSession, Passcode, SessionError};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Where passcodes are sent. Also the rate-limit identity.
    pub approver: String,
    /// Pending approvals held at once. A request beyond this is refused,
    /// never allowed to push out an older one.
    pub max_pending: usize,
    pub delivery_timeout: Duration,
    /// How long past expiry a session stays resendable before it is swept.
    pub abandon_grace: chrono::Duration,
    pub policy: OtpPolicy,
}

impl WorkflowSettings {
    pub fn new(approver: &str) -> Self {
        Self {
            approver: approver.to_string(),
            max_pending: MAX_PENDING_SESSIONS,
            delivery_timeout: Duration::from_secs(DELIVERY_TIMEOUT_SECS),
            abandon_grace: chrono::Duration::seconds(OTP_ABANDON_GRACE_SECS),
            policy: OtpPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Committed(Reservation),
    PendingApproval {
        session_id: Ulid,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendOutcome {
    pub expires_at: DateTime<Utc>,
    pub resend_at: DateTime<Utc>,
}

/// What an approver may see about a pending request. No secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub session_id: Ulid,
    pub room_id: RoomId,
    pub date: NaiveDate,
    pub span: Span,
    pub booked_by: String,
    pub title: String,
    pub expires_at: DateTime<Utc>,
    pub resend_at: DateTime<Utc>,
    pub attempts_left: u32,
}

#[derive(Debug)]
pub enum WorkflowError {
    Validation(ValidationError),
    RateLimited { limit: u32 },
    Session(SessionError),
    Delivery(DeliveryError),
    /// Passcode was rotated but the new one did not go out.
    ResendDeliveryFailed(DeliveryError),
    /// Verified, but the slot was taken while waiting. The session is gone.
    ApprovalConflict(ValidationError),
    Store(String),
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::Validation(e) => write!(f, "{e}"),
            WorkflowError::RateLimited { limit } => {
                write!(f, "daily limit reached ({limit} passcodes per day)")
            }
            WorkflowError::Session(e) => write!(f, "{e}"),
            WorkflowError::Delivery(e) => write!(f, "delivery failed: {e}"),
            WorkflowError::ResendDeliveryFailed(e) => write!(
                f,
                "resend delivery failed, the previous passcode is no longer valid: {e}"
            ),
            WorkflowError::ApprovalConflict(e) => {
                write!(f, "conflict arose during approval window: {e}")
            }
            WorkflowError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<ValidationError> for WorkflowError {
    fn from(e: ValidationError) -> Self {
        WorkflowError::Validation(e)
    }
}

impl From<EngineError> for WorkflowError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(e) => WorkflowError::Validation(e),
            EngineError::Store(e) => WorkflowError::Store(e),
        }
    }
}

impl From<SessionError> for WorkflowError {
    fn from(e: SessionError) -> Self {
        WorkflowError::Session(e)
    }
}

pub struct ReservationWorkflow {
    engine: Arc<Engine>,
    limiter: RateLimiter,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: WorkflowSettings,
    sessions: Mutex<HashMap<Ulid, OtpSession>>,
}

impl ReservationWorkflow {
    /// Fails when there is no usable approver address: without one the gated
    /// room can never be booked.
    pub fn new(
        engine: Arc<Engine>,
        limiter: RateLimiter,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: WorkflowSettings,
    ) -> Result<Self, ConfigError> {
        if settings.approver.trim().is_empty() {
            return Err(ConfigError::MissingApprover);
        }
        if !is_email(&settings.approver) {
            return Err(ConfigError::InvalidApprover(settings.approver.clone()));
        }
        Ok(Self {
            engine,
            limiter,
            sink,
            clock,
            settings,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn request_booking(&self, request: BookingRequest) -> Result<BookingOutcome, WorkflowError> {
        let result = self.try_request_booking(request).await;
        if let Err(e) = &result {
            debug!("booking request refused: {e}");
            metrics::counter!(
                crate::observability::BOOKINGS_REJECTED_TOTAL,
                "reason" => crate::observability::rejection_label(e)
            )
            .increment(1);
        }
        result
    }

    async fn try_request_booking(&self, request: BookingRequest) -> Result<BookingOutcome, WorkflowError> {
        let now = self.clock.now();
        let candidate = self.engine.build(&request, self.engine.window().local(now))?;
        let gated = self.engine.room(&candidate.room_id).is_some_and(|r| r.gated);

        if !gated {
            let committed = self.engine.commit(candidate).await?;
            return Ok(BookingOutcome::Committed(committed));
        }

        self.engine.check(&candidate).await?;
        let approver = self.settings.approver.as_str();
        let (allowed, _) = self.limiter.can_send(approver, now);
        if !allowed {
            return Err(WorkflowError::RateLimited {
                limit: self.limiter.daily_limit(),
            });
        }

        let room_id = candidate.room_id.clone();
        let date = candidate.date;
        let span = candidate.span();
        let label = candidate.label();

        let (session_id, code, expires_at) = {
            let mut sessions = self.sessions.lock().await;
            self.sweep_locked(&mut sessions, now);
            if sessions.len() >= self.settings.max_pending {
                return Err(SessionError::CapacityReached {
                    max: self.settings.max_pending,
                }
                .into());
            }
            let (session, code) = OtpSession::start(candidate, approver, now, self.settings.policy);
            let session_id = Ulid::new();
            let expires_at = session.expires_at;
            sessions.insert(session_id, session);
            metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
            (session_id, code, expires_at)
        };

        if let Err(e) = self.deliver(&code).await {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&session_id);
            metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
            drop(sessions);
            warn!("passcode delivery failed for {label}, request dropped: {e}");
            self.cleared(session_id, &room_id, ClearReason::DeliveryFailed);
            return Err(WorkflowError::Delivery(e));
        }
        self.count_send(now).await;

        info!("approval {session_id} requested for {label}");
        self.engine.notify.send(
            &room_id,
            &BookingEvent::ApprovalRequested {
                session_id,
                room_id: room_id.clone(),
                date,
                span,
            },
        );
        Ok(BookingOutcome::PendingApproval {
            session_id,
            expires_at,
        })
    }

    /// Verify `passcode` and, on success, commit the pending reservation after
    /// re-validating it against the current set.
    pub async fn approve_with_passcode(
        &self,
        session_id: Ulid,
        passcode: &str,
    ) -> Result<Reservation, WorkflowError> {
        let now = self.clock.now();
        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(SessionError::NotFound)?;
            let verdict = session.verify(passcode, now);
            metrics::counter!(
                crate::observability::OTP_VERIFY_TOTAL,
                "outcome" => verify_label(&verdict)
            )
            .increment(1);
            if let Err(e) = verdict {
                debug!("approval {session_id} not verified: {e}");
                return Err(e.into());
            }
            let session = sessions.remove(&session_id).ok_or(SessionError::NotFound)?;
            metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
            session
        };

        let room_id = session.pending().room_id.clone();
        match self.engine.commit(session.pending().clone()).await {
            Ok(committed) => {
                info!("approval {session_id} committed {}", committed.label());
                self.cleared(session_id, &room_id, ClearReason::Committed);
                Ok(committed)
            }
            Err(EngineError::Validation(e)) => {
                warn!("approval {session_id} lost its slot: {e}");
                self.cleared(session_id, &room_id, ClearReason::ApprovalConflict);
                Err(WorkflowError::ApprovalConflict(e))
            }
            Err(EngineError::Store(e)) => {
                // Put the verified session back; it can be retried until it expires.
                warn!("approval {session_id} could not be stored: {e}");
                let mut sessions = self.sessions.lock().await;
                sessions.insert(session_id, session);
                metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
                Err(WorkflowError::Store(e))
            }
        }
    }

    /// Rotate the passcode and send the new one. The caller learns about
    /// cooldown and quota here; on a failed delivery the session keeps the
    /// rotated passcode.
    pub async fn request_resend(&self, session_id: Ulid) -> Result<ResendOutcome, WorkflowError> {
        let now = self.clock.now();
        let approver = self.settings.approver.as_str();
        let (code, outcome) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or(SessionError::NotFound)?;
            if !session.can_resend(now) {
                let wait = (session.resend_at - now).num_seconds().max(1);
                return Err(SessionError::ResendCooldown { retry_in_secs: wait }.into());
            }
            let (allowed, _) = self.limiter.can_send(approver, now);
            if !allowed {
                return Err(WorkflowError::RateLimited {
                    limit: self.limiter.daily_limit(),
                });
            }
            let code = session.resend(now);
            let outcome = ResendOutcome {
                expires_at: session.expires_at,
                resend_at: session.resend_at,
            };
            (code, outcome)
        };

        if let Err(e) = self.deliver(&code).await {
            warn!("resend for approval {session_id} not delivered: {e}");
            return Err(WorkflowError::ResendDeliveryFailed(e));
        }
        self.count_send(now).await;
        info!("approval {session_id} passcode resent");
        Ok(outcome)
    }

    /// Drop a pending approval on purpose.
    pub async fn abandon(&self, session_id: Ulid) -> Result<(), WorkflowError> {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            let removed = sessions.remove(&session_id);
            metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
            removed
        };
        let session = removed.ok_or(SessionError::NotFound)?;
        info!("approval {session_id} abandoned");
        self.cleared(session_id, &session.pending().room_id, ClearReason::Abandoned);
        Ok(())
    }

    pub async fn pending(&self) -> Vec<PendingSummary> {
        let sessions = self.sessions.lock().await;
        let mut list: Vec<(DateTime<Utc>, PendingSummary)> = sessions
            .iter()
            .map(|(id, s)| {
                let r = s.pending();
                (
                    s.created_at,
                    PendingSummary {
                        session_id: *id,
                        room_id: r.room_id.clone(),
                        date: r.date,
                        span: r.span(),
                        booked_by: r.booked_by.clone(),
                        title: r.title.clone(),
                        expires_at: s.expires_at,
                        resend_at: s.resend_at,
                        attempts_left: s.attempts_left,
                    },
                )
            })
            .collect();
        list.sort_by_key(|(created, summary)| (*created, summary.session_id));
        list.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Remove sessions that expired more than the grace period ago.
    pub async fn sweep_abandoned(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        self.sweep_locked(&mut sessions, now)
    }

    fn sweep_locked(&self, sessions: &mut HashMap<Ulid, OtpSession>, now: DateTime<Utc>) -> usize {
        let stale: Vec<Ulid> = sessions
            .iter()
            .filter(|(_, s)| s.is_abandoned(now, self.settings.abandon_grace))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(session) = sessions.remove(id) {
                debug!("swept abandoned approval {id}");
                self.cleared(*id, &session.pending().room_id, ClearReason::Swept);
            }
        }
        if !stale.is_empty() {
            metrics::gauge!(crate::observability::OTP_SESSIONS_ACTIVE).set(sessions.len() as f64);
        }
        stale.len()
    }

    /// Replace every reservation with `batch`, all-or-nothing.
    pub async fn import(&self, batch: Vec<Reservation>) -> Result<usize, WorkflowError> {
        Ok(self.engine.bulk_import(batch).await?)
    }

    async fn deliver(&self, code: &Passcode) -> Result<(), DeliveryError> {
        let approver = self.settings.approver.as_str();
        let result = if !is_email(approver) {
            Err(DeliveryError::InvalidDestination(approver.to_string()))
        } else {
            let started = std::time::Instant::now();
            let sent = tokio::time::timeout(self.settings.delivery_timeout, self.sink.deliver(approver, code)).await;
            metrics::histogram!(crate::observability::DELIVERY_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            sent.unwrap_or(Err(DeliveryError::Timeout(self.settings.delivery_timeout.as_secs())))
        };
        if result.is_err() {
            metrics::counter!(crate::observability::DELIVERY_FAILURES_TOTAL).increment(1);
        }
        result
    }

    /// The quota counts confirmed deliveries only.
    async fn count_send(&self, now: DateTime<Utc>) {
        metrics::counter!(crate::observability::OTP_SENT_TOTAL).increment(1);
        if let Err(e) = self.limiter.record_send(&self.settings.approver, now).await {
            warn!("passcode sent but not counted against the daily limit: {e}");
        }
    }

    fn cleared(&self, session_id: Ulid, room_id: &str, reason: ClearReason) {
        self.engine.notify.send(
            room_id,
            &BookingEvent::ApprovalCleared {
                session_id,
                room_id: room_id.to_string(),
                reason,
            },
        );
    }
}

fn verify_label(verdict: &Result<(), SessionError>) -> &'static str {
    match verdict {
        Ok(()) => "verified",
        Err(SessionError::Expired) => "expired",
        Err(SessionError::Locked) => "locked",
        Err(SessionError::Mismatch { .. }) => "mismatch",
        Err(SessionError::Malformed) => "malformed",
        Err(_) => "other",
    }
}
