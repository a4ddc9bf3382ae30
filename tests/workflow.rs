use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use roomgate::auth::ApproverGate;
use roomgate::clock::{Clock, ManualClock, TimeWindow};
use roomgate::console::{Console, ConsoleError, Reply, parse_command};
use roomgate::engine::{Engine, ValidationError};
use roomgate::limits::*;
use roomgate::mailer::MemorySink;
use roomgate::model::*;
use roomgate::notify::NotifyHub;
use roomgate::otp::SessionError;
use roomgate::rate_limit::{MemoryCounterStore, RateLimiter};
use roomgate::store::{InMemoryStore, ReservationStore};
use roomgate::workflow::{BookingOutcome, ReservationWorkflow, WorkflowError, WorkflowSettings};
use ulid::Ulid;

const APPROVER: &str = "approver@example.com";

// ── Test infrastructure ──────────────────────────────────────

struct Harness {
    workflow: Arc<ReservationWorkflow>,
    sink: Arc<MemorySink>,
    clock: Arc<ManualClock>,
    counters: Arc<MemoryCounterStore>,
    daily_limit: u32,
}

impl Harness {
    fn new() -> Self {
        Self::with(OTP_DAILY_LIMIT, MAX_PENDING_SESSIONS)
    }

    fn with(daily_limit: u32, max_pending: usize) -> Self {
        Self::build(daily_limit, max_pending, Arc::new(InMemoryStore::new()))
    }

    fn with_store(store: Arc<dyn ReservationStore>) -> Self {
        Self::build(OTP_DAILY_LIMIT, MAX_PENDING_SESSIONS, store)
    }

    fn build(daily_limit: u32, max_pending: usize, store: Arc<dyn ReservationStore>) -> Self {
        // 08:30 IST
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2024-01-01T03:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let sink = Arc::new(MemorySink::new());
        let counters = Arc::new(MemoryCounterStore::new());
        let engine = Engine::new(
            store,
            default_rooms(),
            TimeWindow::default(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();
        let mut settings = WorkflowSettings::new(APPROVER);
        settings.max_pending = max_pending;
        let workflow = ReservationWorkflow::new(
            Arc::new(engine),
            RateLimiter::new(counters.clone(), daily_limit),
            sink.clone(),
            clock.clone(),
            settings,
        )
        .unwrap();
        Self {
            workflow: Arc::new(workflow),
            sink,
            clock,
            counters,
            daily_limit,
        }
    }

    fn remaining_today(&self) -> u32 {
        RateLimiter::new(self.counters.clone(), self.daily_limit)
            .can_send(APPROVER, self.clock.now())
            .1
    }

    fn last_code(&self) -> String {
        self.sink.last_code_for(APPROVER).unwrap()
    }

    async fn pending(&self, req: BookingRequest) -> Ulid {
        match self.workflow.request_booking(req).await.unwrap() {
            BookingOutcome::PendingApproval { session_id, .. } => session_id,
            other => panic!("expected pending approval, got {other:?}"),
        }
    }
}

/// In-memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ReservationStore for FlakyStore {
    fn load_all(&self) -> io::Result<Vec<Reservation>> {
        self.inner.load_all()
    }

    fn replace_all(&self, reservations: &[Reservation]) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.inner.replace_all(reservations)
    }
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn req(room: &str, start: NaiveTime, end: NaiveTime) -> BookingRequest {
    BookingRequest {
        room_id: room.into(),
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        start,
        end,
        booked_by: "Meera".into(),
        title: "Quarterly review".into(),
    }
}

/// A six-digit code guaranteed to differ from `code`.
fn wrong(code: &str) -> String {
    code.bytes()
        .map(|b| char::from(b'0' + (b - b'0' + 1) % 10))
        .collect()
}

// ── Direct commit ────────────────────────────────────────────

#[tokio::test]
async fn ungated_room_commits_directly() {
    let h = Harness::new();
    let outcome = h.workflow.request_booking(req("mr1", t(10, 0), t(11, 0))).await.unwrap();
    match outcome {
        BookingOutcome::Committed(r) => {
            assert_eq!(r.room_name, "Meeting Room 1");
            assert_eq!(r.created_at, h.clock.now().with_timezone(&TimeWindow::default().offset));
        }
        other => panic!("expected Committed, got {other:?}"),
    }
    assert_eq!(h.sink.count(), 0);
    assert_eq!(h.workflow.engine().reservation_count().await, 1);

    let clash = h.workflow.request_booking(req("mr1", t(10, 30), t(11, 30))).await;
    assert!(matches!(
        clash,
        Err(WorkflowError::Validation(ValidationError::Conflict(_)))
    ));
}

#[tokio::test]
async fn invalid_gated_request_sends_nothing() {
    let h = Harness::new();
    let result = h.workflow.request_booking(req("br", t(9, 15), t(10, 0))).await;
    assert!(matches!(
        result,
        Err(WorkflowError::Validation(ValidationError::Misaligned { .. }))
    ));
    assert_eq!(h.sink.count(), 0);
    assert!(h.workflow.pending().await.is_empty());
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT);
}

// ── Gated approval ───────────────────────────────────────────

#[tokio::test]
async fn gated_room_waits_for_passcode() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;

    assert_eq!(h.sink.count(), 1);
    assert_eq!(h.workflow.engine().reservation_count().await, 0);
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT - 1);

    let candidate = h
        .workflow
        .engine()
        .build(
            &req("br", t(10, 0), t(11, 0)),
            h.clock.now().with_timezone(&TimeWindow::default().offset),
        )
        .unwrap();

    let committed = h.workflow.approve_with_passcode(session_id, &h.last_code()).await.unwrap();
    assert_eq!(committed, candidate);
    assert_eq!(h.workflow.engine().snapshot().await, vec![candidate]);
    assert!(h.workflow.pending().await.is_empty());

    // session is gone once committed
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &h.last_code()).await,
        Err(WorkflowError::Session(SessionError::NotFound))
    ));
}

#[tokio::test]
async fn fifth_wrong_attempt_locks() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let code = h.last_code();
    let bad = wrong(&code);

    for left in (1..OTP_MAX_ATTEMPTS).rev() {
        let result = h.workflow.approve_with_passcode(session_id, &bad).await;
        assert!(
            matches!(
                result,
                Err(WorkflowError::Session(SessionError::Mismatch { attempts_left })) if attempts_left == left
            ),
            "got {result:?}"
        );
    }
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &bad).await,
        Err(WorkflowError::Session(SessionError::Locked))
    ));
    // even the right code is refused now
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &code).await,
        Err(WorkflowError::Session(SessionError::Locked))
    ));
    assert_eq!(h.workflow.engine().reservation_count().await, 0);
}

#[tokio::test]
async fn malformed_passcode_costs_nothing() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;

    for junk in ["", "12345", "1234567", "12a456"] {
        assert!(matches!(
            h.workflow.approve_with_passcode(session_id, junk).await,
            Err(WorkflowError::Session(SessionError::Malformed))
        ));
    }
    assert_eq!(h.workflow.pending().await[0].attempts_left, OTP_MAX_ATTEMPTS);
    h.workflow.approve_with_passcode(session_id, &h.last_code()).await.unwrap();
}

#[tokio::test]
async fn expired_session_needs_resend() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let first = h.last_code();

    h.clock.advance(Duration::seconds(OTP_TTL_SECS + 1));
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &first).await,
        Err(WorkflowError::Session(SessionError::Expired))
    ));

    let outcome = h.workflow.request_resend(session_id).await.unwrap();
    assert_eq!(outcome.expires_at, h.clock.now() + Duration::seconds(OTP_TTL_SECS));
    assert_eq!(h.sink.count(), 2);

    h.workflow.approve_with_passcode(session_id, &h.last_code()).await.unwrap();
    assert_eq!(h.workflow.engine().reservation_count().await, 1);
}

#[tokio::test]
async fn resend_cooldown_and_rotation() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let old = h.last_code();

    match h.workflow.request_resend(session_id).await {
        Err(WorkflowError::Session(SessionError::ResendCooldown { retry_in_secs })) => {
            assert_eq!(retry_in_secs, OTP_RESEND_COOLDOWN_SECS);
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    assert_eq!(h.sink.count(), 1);

    h.clock.advance(Duration::seconds(OTP_RESEND_COOLDOWN_SECS));
    h.workflow.request_resend(session_id).await.unwrap();
    let new = h.last_code();
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT - 2);

    assert_ne!(new, old);
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &old).await,
        Err(WorkflowError::Session(SessionError::Mismatch { .. }))
    ));
    h.workflow.approve_with_passcode(session_id, &new).await.unwrap();
}

#[tokio::test]
async fn resend_restores_attempts() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let bad = wrong(&h.last_code());
    for _ in 0..OTP_MAX_ATTEMPTS {
        let _ = h.workflow.approve_with_passcode(session_id, &bad).await;
    }

    h.clock.advance(Duration::seconds(OTP_RESEND_COOLDOWN_SECS));
    h.workflow.request_resend(session_id).await.unwrap();
    assert_eq!(h.workflow.pending().await[0].attempts_left, OTP_MAX_ATTEMPTS);
    h.workflow.approve_with_passcode(session_id, &h.last_code()).await.unwrap();
}

// ── Rate limit ───────────────────────────────────────────────

#[tokio::test]
async fn daily_limit_blocks_new_sessions() {
    let h = Harness::with(2, MAX_PENDING_SESSIONS);
    h.pending(req("br", t(10, 0), t(11, 0))).await;
    h.pending(req("br", t(11, 0), t(12, 0))).await;

    let third = h.workflow.request_booking(req("br", t(12, 0), t(13, 0))).await;
    assert!(matches!(third, Err(WorkflowError::RateLimited { limit: 2 })));
    assert_eq!(h.workflow.pending().await.len(), 2);
    assert_eq!(h.sink.count(), 2);

    // ungated rooms are unaffected
    assert!(matches!(
        h.workflow.request_booking(req("mr2", t(12, 0), t(13, 0))).await,
        Ok(BookingOutcome::Committed(_))
    ));
}

#[tokio::test]
async fn daily_limit_blocks_resend() {
    let h = Harness::with(1, MAX_PENDING_SESSIONS);
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let code = h.last_code();

    h.clock.advance(Duration::seconds(OTP_RESEND_COOLDOWN_SECS));
    assert!(matches!(
        h.workflow.request_resend(session_id).await,
        Err(WorkflowError::RateLimited { limit: 1 })
    ));
    // refused resend leaves the current passcode valid
    h.workflow.approve_with_passcode(session_id, &code).await.unwrap();
}

#[tokio::test]
async fn limit_resets_on_next_utc_day() {
    let h = Harness::with(1, MAX_PENDING_SESSIONS);
    h.pending(req("br", t(10, 0), t(11, 0))).await;
    assert!(matches!(
        h.workflow.request_booking(req("br", t(11, 0), t(12, 0))).await,
        Err(WorkflowError::RateLimited { .. })
    ));

    h.clock.advance(Duration::days(1));
    h.pending(req("br", t(11, 0), t(12, 0))).await;
}

// ── Failure paths ────────────────────────────────────────────

#[tokio::test]
async fn approval_time_conflict_clears_session() {
    let h = Harness::new();
    let first = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let first_code = h.last_code();
    let second = h.pending(req("br", t(10, 30), t(11, 30))).await;
    let second_code = h.last_code();

    h.workflow.approve_with_passcode(first, &first_code).await.unwrap();

    let result = h.workflow.approve_with_passcode(second, &second_code).await;
    match result {
        Err(WorkflowError::ApprovalConflict(ValidationError::Conflict(span))) => {
            assert_eq!(span, Span::new(600, 660));
        }
        other => panic!("expected ApprovalConflict, got {other:?}"),
    }
    assert!(h.workflow.pending().await.is_empty());
    assert_eq!(h.workflow.engine().reservation_count().await, 1);
}

#[tokio::test]
async fn delivery_failure_leaves_no_session_and_no_charge() {
    let h = Harness::new();
    h.sink.set_failing(true);

    let result = h.workflow.request_booking(req("br", t(10, 0), t(11, 0))).await;
    match &result {
        Err(e @ WorkflowError::Delivery(_)) => {
            assert!(e.to_string().starts_with("delivery failed"));
        }
        other => panic!("expected Delivery, got {other:?}"),
    }
    assert!(h.workflow.pending().await.is_empty());
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT);

    h.sink.set_failing(false);
    h.pending(req("br", t(10, 0), t(11, 0))).await;
}

#[tokio::test]
async fn failed_resend_invalidates_old_code() {
    let h = Harness::new();
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let old = h.last_code();

    h.clock.advance(Duration::seconds(OTP_RESEND_COOLDOWN_SECS));
    h.sink.set_failing(true);
    assert!(matches!(
        h.workflow.request_resend(session_id).await,
        Err(WorkflowError::ResendDeliveryFailed(_))
    ));
    assert_eq!(h.workflow.pending().await.len(), 1);
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT - 1);

    // the rotated code never went out, and the old one is dead
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &old).await,
        Err(WorkflowError::Session(SessionError::Mismatch { .. }))
    ));
    assert_eq!(h.workflow.engine().reservation_count().await, 0);

    h.sink.set_failing(false);
    h.clock.advance(Duration::seconds(OTP_RESEND_COOLDOWN_SECS));
    h.workflow.request_resend(session_id).await.unwrap();
    h.workflow.approve_with_passcode(session_id, &h.last_code()).await.unwrap();
    assert_eq!(h.workflow.engine().reservation_count().await, 1);
}

#[tokio::test]
async fn store_failure_at_approval_keeps_session_for_retry() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::with_store(store.clone());
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;
    let code = h.last_code();

    store.set_failing(true);
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &code).await,
        Err(WorkflowError::Store(_))
    ));
    let pending = h.workflow.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].session_id, session_id);
    assert_eq!(h.workflow.engine().reservation_count().await, 0);

    store.set_failing(false);
    let committed = h.workflow.approve_with_passcode(session_id, &code).await.unwrap();
    assert_eq!(committed.start, t(10, 0));
    assert_eq!(store.load_all().unwrap(), vec![committed]);
    assert!(h.workflow.pending().await.is_empty());
}

#[tokio::test]
async fn retry_after_store_failure_is_bound_by_expiry() {
    let store = Arc::new(FlakyStore::default());
    let h = Harness::with_store(store.clone());
    let session_id = h.pending(req("br", t(10, 0), t(11, 0))).await;

    store.set_failing(true);
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &h.last_code()).await,
        Err(WorkflowError::Store(_))
    ));
    store.set_failing(false);

    h.clock.advance(Duration::seconds(OTP_TTL_SECS + 1));
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, "000000").await,
        Err(WorkflowError::Session(SessionError::Expired))
    ));
    assert_eq!(h.workflow.engine().reservation_count().await, 0);

    // a resend reopens it and the new passcode is required again
    h.workflow.request_resend(session_id).await.unwrap();
    let fresh = h.last_code();
    assert!(matches!(
        h.workflow.approve_with_passcode(session_id, &wrong(&fresh)).await,
        Err(WorkflowError::Session(SessionError::Mismatch { .. }))
    ));
    h.workflow.approve_with_passcode(session_id, &fresh).await.unwrap();
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new();
    let ghost = Ulid::new();
    assert!(matches!(
        h.workflow.approve_with_passcode(ghost, "123456").await,
        Err(WorkflowError::Session(SessionError::NotFound))
    ));
    assert!(matches!(
        h.workflow.request_resend(ghost).await,
        Err(WorkflowError::Session(SessionError::NotFound))
    ));
}

// ── Capacity and sweeping ────────────────────────────────────

#[tokio::test]
async fn capacity_is_enforced() {
    let h = Harness::with(OTP_DAILY_LIMIT, 2);
    h.pending(req("br", t(10, 0), t(11, 0))).await;
    h.pending(req("br", t(11, 0), t(12, 0))).await;

    assert!(matches!(
        h.workflow.request_booking(req("br", t(12, 0), t(13, 0))).await,
        Err(WorkflowError::Session(SessionError::CapacityReached { max: 2 }))
    ));
    assert_eq!(h.sink.count(), 2);
    assert_eq!(h.remaining_today(), OTP_DAILY_LIMIT - 2);
}

#[tokio::test]
async fn abandoned_sessions_are_swept() {
    let h = Harness::with(OTP_DAILY_LIMIT, 1);
    let stale = h.pending(req("br", t(10, 0), t(11, 0))).await;

    // expired but within grace: still holds its place
    h.clock.advance(Duration::seconds(OTP_TTL_SECS + 60));
    assert_eq!(h.workflow.sweep_abandoned().await, 0);
    assert!(matches!(
        h.workflow.request_booking(req("br", t(14, 0), t(15, 0))).await,
        Err(WorkflowError::Session(SessionError::CapacityReached { .. }))
    ));

    // past grace: a new request clears it on the way in
    h.clock.advance(Duration::seconds(OTP_ABANDON_GRACE_SECS));
    h.pending(req("br", t(14, 0), t(15, 0))).await;
    assert!(matches!(
        h.workflow.request_resend(stale).await,
        Err(WorkflowError::Session(SessionError::NotFound))
    ));

    h.clock.advance(Duration::seconds(OTP_TTL_SECS + OTP_ABANDON_GRACE_SECS + 1));
    assert_eq!(h.workflow.sweep_abandoned().await, 1);
    assert!(h.workflow.pending().await.is_empty());
}

// ── Console ──────────────────────────────────────────────────

#[tokio::test]
async fn console_gates_approval_behind_pin() {
    let h = Harness::new();
    let mut console = Console::new(h.workflow.clone(), ApproverGate::new(Some("2468".into())));

    let reply = console
        .execute(parse_command("book br 2024-01-01 10:00 11:00 Meera Board review").unwrap())
        .await
        .unwrap();
    let Reply::Text(text) = reply else { panic!("expected text") };
    assert!(text.starts_with("approval "));

    let session_id = h.workflow.pending().await[0].session_id;
    let approve = format!("approve {session_id} {}", h.last_code());

    assert!(matches!(
        console.execute(parse_command(&approve).unwrap()).await,
        Err(ConsoleError::Locked)
    ));
    assert!(matches!(
        console.execute(parse_command("unlock 1111").unwrap()).await,
        Err(ConsoleError::WrongPin)
    ));
    console.execute(parse_command("unlock 2468").unwrap()).await.unwrap();
    assert!(console.is_unlocked());

    let Reply::Text(text) = console.execute(parse_command(&approve).unwrap()).await.unwrap() else {
        panic!("expected text")
    };
    assert_eq!(text, "approved and booked Board Room 2024-01-01 10:00-11:00");

    let Reply::Text(schedule) = console
        .execute(parse_command("schedule br 2024-01-01").unwrap())
        .await
        .unwrap()
    else {
        panic!("expected text")
    };
    assert!(schedule.contains("10:00-11:00"));
    assert_eq!(console.execute(parse_command("quit").unwrap()).await.unwrap(), Reply::Quit);
}

#[tokio::test]
async fn console_import_export_round_trip() {
    let h = Harness::new();
    let mut console = Console::new(h.workflow.clone(), ApproverGate::new(None));
    console
        .execute(parse_command("book mr1 2024-01-01 10:00 11:00 Asha Standup").unwrap())
        .await
        .unwrap();

    let dir = std::env::temp_dir().join(format!("roomgate_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("export.json");

    console
        .execute(parse_command(&format!("export {}", path.display())).unwrap())
        .await
        .unwrap();
    let before = h.workflow.engine().snapshot().await;

    h.workflow.import(Vec::new()).await.unwrap();
    assert_eq!(h.workflow.engine().reservation_count().await, 0);

    let Reply::Text(text) = console
        .execute(parse_command(&format!("import {}", path.display())).unwrap())
        .await
        .unwrap()
    else {
        panic!("expected text")
    };
    assert_eq!(text, "imported 1 reservations");
    assert_eq!(h.workflow.engine().snapshot().await, before);
}
