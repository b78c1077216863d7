//! Session model: one record per registered agent.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Operator date format for kill dates (`MM/DD/YYYY`).
const KILL_DATE_FORMAT: &str = "%m/%d/%Y";

/// Time-of-day window during which an agent is permitted to be active.
///
/// Parsed from `HH:MM-HH:MM`. A window whose end precedes its start wraps
/// across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    /// Inclusive window start.
    pub start: NaiveTime,
    /// Inclusive window end.
    pub end: NaiveTime,
}

impl WorkingHours {
    /// Parse a `HH:MM-HH:MM` window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the string is not two valid
    /// `HH:MM` times separated by a dash.
    pub fn parse(raw: &str) -> Result<Self> {
        let (start_raw, end_raw) = raw
            .split_once('-')
            .ok_or_else(|| AppError::Validation(format!("working hours must be HH:MM-HH:MM, got '{raw}'")))?;
        let start = NaiveTime::parse_from_str(start_raw.trim(), "%H:%M")
            .map_err(|err| AppError::Validation(format!("invalid window start '{start_raw}': {err}")))?;
        let end = NaiveTime::parse_from_str(end_raw.trim(), "%H:%M")
            .map_err(|err| AppError::Validation(format!("invalid window end '{end_raw}': {err}")))?;
        Ok(Self { start, end })
    }

    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            // Overnight window, e.g. 22:00-06:00.
            time >= self.start || time <= self.end
        }
    }

    /// Render back to the canonical `HH:MM-HH:MM` form.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Parse an operator-supplied kill date (`MM/DD/YYYY`).
///
/// # Errors
///
/// Returns `AppError::Validation` if the value does not parse.
pub fn parse_kill_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), KILL_DATE_FORMAT)
        .map_err(|err| AppError::Validation(format!("invalid kill date '{raw}': {err}")))
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable unique identifier assigned at first check-in; never reused.
    pub id: String,
    /// Mutable alias; unique among active sessions. Defaults to `id`.
    pub name: String,
    /// Opaque per-agent key handed to the packet codec.
    pub session_key: String,
    /// Self-scheduled check-in interval in seconds.
    pub delay: u32,
    /// Fractional multiplier of `delay`, in `[0, 1]`.
    pub jitter: f64,
    /// Consecutive missed check-ins tolerated before the agent gives up.
    pub lost_limit: u32,
    /// Date after which the agent terminates itself.
    pub kill_date: Option<NaiveDate>,
    /// Time-of-day activity window.
    pub working_hours: Option<WorkingHours>,
    /// Whether the agent runs in a privileged execution context.
    pub elevated: bool,
    /// Reported account name.
    pub username: Option<String>,
    /// Reported host name.
    pub hostname: Option<String>,
    /// Address the agent reports for itself.
    pub internal_ip: Option<String>,
    /// Address the check-in actually arrived from.
    pub external_ip: Option<String>,
    /// Reported operating system details.
    pub os_details: Option<String>,
    /// Reported process name.
    pub process_name: Option<String>,
    /// Reported process id.
    pub process_id: Option<u32>,
    /// Name of the listener that registered this session.
    pub listener: String,
    /// First contact; immutable.
    pub checkin_time: DateTime<Utc>,
    /// Most recent contact.
    pub last_checkin: DateTime<Utc>,
}

impl Session {
    /// Generate a fresh session identifier (8-char token).
    #[must_use]
    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string().chars().take(8).collect()
    }
}

/// Typed identifier-plus-value for a mutable session field.
///
/// Replaces set-any-field-by-string: the field set is closed, each field
/// carries its typed value, and unknown names fail at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionField {
    /// Alias rename (uniqueness enforced by the registry).
    Name(String),
    /// Check-in interval seconds; must be non-zero.
    Delay(u32),
    /// Jitter fraction; must be within `[0, 1]`.
    Jitter(f64),
    /// Missed check-in tolerance.
    LostLimit(u32),
    /// Self-termination date; `None` clears it.
    KillDate(Option<NaiveDate>),
    /// Activity window; `None` clears it.
    WorkingHours(Option<WorkingHours>),
    /// Privileged-context flag.
    Elevated(bool),
    /// Liveness timestamp.
    LastCheckin(DateTime<Utc>),
}

impl SessionField {
    /// Parse a field from its operator-facing name and raw value.
    ///
    /// An empty value clears the optional fields (`kill_date`,
    /// `working_hours`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown field name or a value
    /// that does not parse or is out of range.
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        match field {
            "name" => {
                if value.is_empty() {
                    return Err(AppError::Validation("session name must not be empty".into()));
                }
                Ok(Self::Name(value.to_owned()))
            }
            "delay" => {
                let delay: u32 = value
                    .parse()
                    .map_err(|_| AppError::Validation(format!("delay must be an integer, got '{value}'")))?;
                Self::Delay(delay).validated()
            }
            "jitter" => {
                let jitter: f64 = value
                    .parse()
                    .map_err(|_| AppError::Validation(format!("jitter must be a number, got '{value}'")))?;
                Self::Jitter(jitter).validated()
            }
            "lost_limit" => {
                let limit: u32 = value
                    .parse()
                    .map_err(|_| AppError::Validation(format!("lost limit must be an integer, got '{value}'")))?;
                Ok(Self::LostLimit(limit))
            }
            "kill_date" => {
                if value.is_empty() {
                    Ok(Self::KillDate(None))
                } else {
                    Ok(Self::KillDate(Some(parse_kill_date(value)?)))
                }
            }
            "working_hours" => {
                if value.is_empty() {
                    Ok(Self::WorkingHours(None))
                } else {
                    Ok(Self::WorkingHours(Some(WorkingHours::parse(value)?)))
                }
            }
            "elevated" => {
                let elevated: bool = value
                    .parse()
                    .map_err(|_| AppError::Validation(format!("elevated must be true or false, got '{value}'")))?;
                Ok(Self::Elevated(elevated))
            }
            other => Err(AppError::Validation(format!("unknown session field '{other}'"))),
        }
    }

    /// Range-check the carried value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a zero delay or a jitter outside
    /// `[0, 1]`.
    pub fn validated(self) -> Result<Self> {
        match &self {
            Self::Delay(0) => Err(AppError::Validation("delay must be greater than zero".into())),
            Self::Jitter(jitter) if !(0.0..=1.0).contains(jitter) => Err(AppError::Validation(
                format!("jitter must be within [0, 1], got {jitter}"),
            )),
            _ => Ok(self),
        }
    }

    /// Operator-facing name of the field this variant mutates.
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Delay(_) => "delay",
            Self::Jitter(_) => "jitter",
            Self::LostLimit(_) => "lost_limit",
            Self::KillDate(_) => "kill_date",
            Self::WorkingHours(_) => "working_hours",
            Self::Elevated(_) => "elevated",
            Self::LastCheckin(_) => "last_checkin",
        }
    }
}

/// Metadata decoded from an inbound check-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckinMetadata {
    /// Session id the agent believes it has; `None` on first contact.
    pub session_id: Option<String>,
    /// Per-agent codec key negotiated at staging.
    pub session_key: String,
    /// Reported account name.
    pub username: Option<String>,
    /// Reported host name.
    pub hostname: Option<String>,
    /// Address the agent reports for itself.
    pub internal_ip: Option<String>,
    /// Reported operating system details.
    pub os_details: Option<String>,
    /// Reported process name.
    pub process_name: Option<String>,
    /// Reported process id.
    pub process_id: Option<u32>,
    /// Whether the agent runs in a privileged execution context.
    pub elevated: bool,
}
