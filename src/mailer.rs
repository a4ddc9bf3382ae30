use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;

use crate::otp::Passcode;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles"));

/// Syntactic check only: something@something.tld, no whitespace.
pub fn is_email(s: &str) -> bool {
    EMAIL_SHAPE.is_match(s.trim())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    InvalidDestination(String),
    Transport(String),
    Timeout(u64),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::InvalidDestination(d) => write!(f, "invalid destination: {d}"),
            DeliveryError::Transport(e) => write!(f, "transport error: {e}"),
            DeliveryError::Timeout(secs) => write!(f, "no answer from sink within {secs}s"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Where passcodes go. One call, one attempt; retrying is the sink's business.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, destination: &str, passcode: &Passcode) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub from_name: String,
}

pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    brand: String,
    ttl_minutes: i64,
}

impl SmtpSink {
    /// Port 465 speaks implicit TLS, anything else upgrades with STARTTLS.
    pub fn new(
        settings: &SmtpSettings,
        brand: &str,
        ttl_minutes: i64,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let builder = if settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| DeliveryError::Transport(format!("failed to create SMTP transport: {e}")))?;

        let transport = builder
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .port(settings.port)
            .timeout(Some(timeout))
            .build();

        let from = format!("{} <{}>", settings.from_name, settings.from)
            .parse()
            .map_err(|e| DeliveryError::InvalidDestination(format!("from address: {e}")))?;

        Ok(Self {
            transport,
            from,
            brand: brand.to_string(),
            ttl_minutes,
        })
    }
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn deliver(&self, destination: &str, passcode: &Passcode) -> Result<(), DeliveryError> {
        let to: Mailbox = destination
            .trim()
            .parse()
            .map_err(|_| DeliveryError::InvalidDestination(destination.to_string()))?;
        let body = format!(
            "Your one-time passcode is: {}\n\nIt expires in {} minutes.\nDo not share it with anyone.\n",
            passcode.as_str(),
            self.ttl_minutes
        );
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(format!("{} - Board Room approval passcode", self.brand))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| DeliveryError::Transport(format!("failed to build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Stand-in when no mail gateway is configured: every delivery fails, so
/// gated bookings are refused while ungated rooms keep working.
#[derive(Debug, Default)]
pub struct DisabledSink;

#[async_trait]
impl NotificationSink for DisabledSink {
    async fn deliver(&self, _destination: &str, _passcode: &Passcode) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("email gateway not configured".into()))
    }
}

/// Keeps deliveries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Most recent passcode delivered to `destination`.
    pub fn last_code_for(&self, destination: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(to, _)| to == destination)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, destination: &str, passcode: &Passcode) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("sink unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((destination.to_string(), passcode.as_str().to_string()));
        Ok(())
    }
}
