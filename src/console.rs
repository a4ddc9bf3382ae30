//! Line-oriented operator commands: parsing and execution.
//!
//! Arguments are whitespace separated and may be double-quoted to keep
//! spaces; the booking title is the rest of the line. Approval commands need
//! `unlock <pin>` first.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::ApproverGate;
use crate::clock::fmt_hm;
use crate::model::*;
use crate::workflow::{BookingOutcome, ReservationWorkflow, WorkflowError};

/// Parsed console command.
#[derive(Debug, PartialEq)]
pub enum Command {
    Rooms,
    Book(BookingRequest),
    Unlock { pin: String },
    Lock,
    Approve { session_id: Ulid, passcode: String },
    Resend { session_id: Ulid },
    Abandon { session_id: Ulid },
    Pending,
    Status,
    Schedule { room_id: RoomId, date: NaiveDate },
    Free { room_id: RoomId, date: NaiveDate },
    Import { path: PathBuf },
    Export { path: PathBuf },
    Help,
    Quit,
}

pub const HELP: &str = "\
rooms                                         list rooms
book <room> <YYYY-MM-DD> <HH:MM> <HH:MM> <name> <title...>
                                              quote a multi-word name: \"Meera Iyer\"
status                                        what is on right now
schedule <room> <YYYY-MM-DD>                  bookings for a day
free <room> <YYYY-MM-DD>                      open slots for a day
pending                                       approvals waiting on a passcode
unlock <pin> / lock                           approver mode
approve <session> <passcode>                  (approver)
resend <session>                              (approver)
abandon <session>                             (approver)
import <file.json> / export <file.json>
help / quit";

pub fn parse_command(line: &str) -> Result<Command, ConsoleError> {
    let words = split_args(line)?;
    let Some((verb, rest)) = words.split_first() else {
        return Err(ConsoleError::Empty);
    };
    let args: Vec<&str> = rest.iter().map(String::as_str).collect();

    match verb.to_ascii_lowercase().as_str() {
        "rooms" => no_args("rooms", &args, Command::Rooms),
        "status" => no_args("status", &args, Command::Status),
        "pending" => no_args("pending", &args, Command::Pending),
        "lock" => no_args("lock", &args, Command::Lock),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "book" => {
            if args.len() < 6 {
                return Err(ConsoleError::Usage(
                    "book <room> <YYYY-MM-DD> <HH:MM> <HH:MM> <name> <title...>",
                ));
            }
            Ok(Command::Book(BookingRequest {
                room_id: args[0].to_string(),
                date: parse_date(args[1])?,
                start: parse_hm(args[2]).map_err(|_| ConsoleError::BadTime(args[2].to_string()))?,
                end: parse_hm(args[3]).map_err(|_| ConsoleError::BadTime(args[3].to_string()))?,
                booked_by: args[4].to_string(),
                title: args[5..].join(" "),
            }))
        }
        "unlock" => match args.as_slice() {
            [pin] => Ok(Command::Unlock { pin: pin.to_string() }),
            _ => Err(ConsoleError::Usage("unlock <pin>")),
        },
        "approve" => match args.as_slice() {
            [id, code] => Ok(Command::Approve {
                session_id: parse_session(id)?,
                passcode: code.to_string(),
            }),
            _ => Err(ConsoleError::Usage("approve <session> <passcode>")),
        },
        "resend" => match args.as_slice() {
            [id] => Ok(Command::Resend { session_id: parse_session(id)? }),
            _ => Err(ConsoleError::Usage("resend <session>")),
        },
        "abandon" => match args.as_slice() {
            [id] => Ok(Command::Abandon { session_id: parse_session(id)? }),
            _ => Err(ConsoleError::Usage("abandon <session>")),
        },
        "schedule" => match args.as_slice() {
            [room, date] => Ok(Command::Schedule {
                room_id: room.to_string(),
                date: parse_date(date)?,
            }),
            _ => Err(ConsoleError::Usage("schedule <room> <YYYY-MM-DD>")),
        },
        "free" => match args.as_slice() {
            [room, date] => Ok(Command::Free {
                room_id: room.to_string(),
                date: parse_date(date)?,
            }),
            _ => Err(ConsoleError::Usage("free <room> <YYYY-MM-DD>")),
        },
        "import" => match args.as_slice() {
            [path] => Ok(Command::Import { path: PathBuf::from(path) }),
            _ => Err(ConsoleError::Usage("import <file.json>")),
        },
        "export" => match args.as_slice() {
            [path] => Ok(Command::Export { path: PathBuf::from(path) }),
            _ => Err(ConsoleError::Usage("export <file.json>")),
        },
        other => Err(ConsoleError::UnknownCommand(other.to_string())),
    }
}

/// Whitespace split with `"..."` grouping. Quotes are dropped.
fn split_args(line: &str) -> Result<Vec<String>, ConsoleError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err(ConsoleError::UnclosedQuote);
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn no_args(usage: &'static str, args: &[&str], cmd: Command) -> Result<Command, ConsoleError> {
    if args.is_empty() {
        Ok(cmd)
    } else {
        Err(ConsoleError::Usage(usage))
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ConsoleError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ConsoleError::BadDate(raw.to_string()))
}

fn parse_session(raw: &str) -> Result<Ulid, ConsoleError> {
    Ulid::from_string(raw).map_err(|_| ConsoleError::BadSession(raw.to_string()))
}

/// What the REPL should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// One operator session. Holds the approver unlock state.
pub struct Console {
    workflow: Arc<ReservationWorkflow>,
    gate: ApproverGate,
    unlocked: bool,
}

impl Console {
    pub fn new(workflow: Arc<ReservationWorkflow>, gate: ApproverGate) -> Self {
        Self {
            workflow,
            gate,
            unlocked: false,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub async fn execute(&mut self, cmd: Command) -> Result<Reply, ConsoleError> {
        let engine = self.workflow.engine().clone();
        let text = match cmd {
            Command::Quit => return Ok(Reply::Quit),
            Command::Help => HELP.to_string(),
            Command::Rooms => engine
                .rooms()
                .iter()
                .map(|r| {
                    let gated = if r.gated { "  (approval required)" } else { "" };
                    format!("{:<4} {}{gated}", r.id, r.name)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Command::Book(request) => match self.workflow.request_booking(request).await? {
                BookingOutcome::Committed(r) => format!("booked {}", r.label()),
                BookingOutcome::PendingApproval { session_id, expires_at } => {
                    let local = engine.window().local(expires_at);
                    format!(
                        "approval {session_id} pending; passcode sent to the approver, valid until {}",
                        local.format("%H:%M")
                    )
                }
            },
            Command::Unlock { pin } => {
                if !self.gate.is_configured() {
                    return Err(ConsoleError::NoPin);
                }
                if !self.gate.check(&pin) {
                    self.unlocked = false;
                    return Err(ConsoleError::WrongPin);
                }
                self.unlocked = true;
                "approver mode on".to_string()
            }
            Command::Lock => {
                self.unlocked = false;
                "approver mode off".to_string()
            }
            Command::Approve { session_id, passcode } => {
                self.require_unlocked()?;
                let r = self.workflow.approve_with_passcode(session_id, &passcode).await?;
                format!("approved and booked {}", r.label())
            }
            Command::Resend { session_id } => {
                self.require_unlocked()?;
                let outcome = self.workflow.request_resend(session_id).await?;
                format!(
                    "new passcode sent, valid until {}",
                    engine.window().local(outcome.expires_at).format("%H:%M")
                )
            }
            Command::Abandon { session_id } => {
                self.require_unlocked()?;
                self.workflow.abandon(session_id).await?;
                format!("approval {session_id} dropped")
            }
            Command::Pending => {
                let pending = self.workflow.pending().await;
                if pending.is_empty() {
                    "no pending approvals".to_string()
                } else {
                    pending
                        .iter()
                        .map(|p| {
                            format!(
                                "{}  {} {} {}  {} / {}  expires {}  attempts left {}",
                                p.session_id,
                                p.room_id,
                                p.date,
                                p.span,
                                p.booked_by,
                                p.title,
                                engine.window().local(p.expires_at).format("%H:%M"),
                                p.attempts_left
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Status => {
                let now = engine.window().local(self.workflow.now()).naive_local();
                let mut lines = Vec::new();
                for room in engine.rooms() {
                    let status = engine.room_status(&room.id, now.date(), now).await.map_err(WorkflowError::from)?;
                    lines.push(format!("{:<16} {}", room.name, status.label()));
                }
                lines.join("\n")
            }
            Command::Schedule { room_id, date } => {
                if engine.room(&room_id).is_none() {
                    return Err(WorkflowError::Validation(crate::engine::ValidationError::UnknownRoom(room_id)).into());
                }
                let rows = engine.reservations_for(&room_id, date).await;
                if rows.is_empty() {
                    format!("no bookings for {room_id} on {date}")
                } else {
                    rows.iter()
                        .map(|r| format!("{}-{}  {}  {}", fmt_hm(r.start), fmt_hm(r.end), r.booked_by, r.title))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Free { room_id, date } => {
                let slots = engine.free_slots(&room_id, date).await.map_err(WorkflowError::from)?;
                if slots.is_empty() {
                    format!("{room_id} is fully booked on {date}")
                } else {
                    slots.iter().map(Span::to_string).collect::<Vec<_>>().join(" ")
                }
            }
            Command::Import { path } => {
                let raw = std::fs::read_to_string(&path).map_err(|e| ConsoleError::Io(e.to_string()))?;
                let batch: Vec<Reservation> =
                    serde_json::from_str(&raw).map_err(|e| ConsoleError::Json(e.to_string()))?;
                let count = self.workflow.import(batch).await?;
                format!("imported {count} reservations")
            }
            Command::Export { path } => {
                let rows = engine.snapshot().await;
                let json = serde_json::to_string_pretty(&rows).map_err(|e| ConsoleError::Json(e.to_string()))?;
                std::fs::write(&path, json).map_err(|e| ConsoleError::Io(e.to_string()))?;
                format!("exported {} reservations to {}", rows.len(), path.display())
            }
        };
        Ok(Reply::Text(text))
    }

    fn require_unlocked(&self) -> Result<(), ConsoleError> {
        if self.unlocked { Ok(()) } else { Err(ConsoleError::Locked) }
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConsoleError {
    Empty,
    UnknownCommand(String),
    Usage(&'static str),
    BadDate(String),
    BadTime(String),
    BadSession(String),
    UnclosedQuote,
    Locked,
    NoPin,
    WrongPin,
    Workflow(WorkflowError),
    Io(String),
    Json(String),
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleError::Empty => write!(f, "empty command"),
            ConsoleError::UnknownCommand(c) => write!(f, "unknown command: {c} (try help)"),
            ConsoleError::Usage(u) => write!(f, "usage: {u}"),
            ConsoleError::BadDate(d) => write!(f, "bad date (want YYYY-MM-DD): {d}"),
            ConsoleError::BadTime(t) => write!(f, "bad time (want HH:MM): {t}"),
            ConsoleError::BadSession(s) => write!(f, "bad session id: {s}"),
            ConsoleError::UnclosedQuote => write!(f, "unclosed quote"),
            ConsoleError::Locked => write!(f, "approver mode required (unlock <pin>)"),
            ConsoleError::NoPin => write!(f, "no approver PIN configured"),
            ConsoleError::WrongPin => write!(f, "wrong PIN"),
            ConsoleError::Workflow(e) => write!(f, "{e}"),
            ConsoleError::Io(e) => write!(f, "io error: {e}"),
            ConsoleError::Json(e) => write!(f, "bad json: {e}"),
        }
    }
}

impl std::error::Error for ConsoleError {}

impl From<WorkflowError> for ConsoleError {
    fn from(e: WorkflowError) -> Self {
        ConsoleError::Workflow(e)
    }
}
