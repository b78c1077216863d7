//! Listener model: named, independently configurable server endpoints.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::session::WorkingHours;
use crate::{AppError, Result};

/// Transport variant for a listener. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    /// Direct HTTP endpoint served by this process.
    Native,
    /// Endpoint that relays through an already-registered agent.
    Pivot,
    /// Endpoint that redirects staging through an external host.
    Hop,
}

impl ListenerKind {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Pivot => "pivot",
            Self::Hop => "hop",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a value outside the closed set.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "native" => Ok(Self::Native),
            "pivot" => Ok(Self::Pivot),
            "hop" => Ok(Self::Hop),
            other => Err(AppError::Validation(format!("unknown listener type '{other}'"))),
        }
    }

    /// Option names that must be present before a listener of this kind can
    /// be created.
    #[must_use]
    pub fn required_options(self) -> &'static [&'static str] {
        match self {
            Self::Native => &["host", "port"],
            Self::Pivot | Self::Hop => &["host", "port", "redirect_target"],
        }
    }
}

/// Configurable option set for a listener.
///
/// `default_*` values seed the runtime parameters of every session that
/// registers through the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerOptions {
    /// Bind host.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
    /// TLS certificate path, when serving HTTPS through a fronting proxy.
    pub cert_path: Option<String>,
    /// Communication profile line (request URI and user-agent).
    pub profile: Option<String>,
    /// Forwarding target for pivot/hop kinds.
    pub redirect_target: Option<String>,
    /// Check-in interval seeded into new sessions.
    pub default_delay: u32,
    /// Jitter fraction seeded into new sessions.
    pub default_jitter: f64,
    /// Missed check-in tolerance seeded into new sessions.
    pub default_lost_limit: u32,
    /// Kill date seeded into new sessions.
    pub kill_date: Option<NaiveDate>,
    /// Working hours seeded into new sessions.
    pub working_hours: Option<WorkingHours>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            cert_path: None,
            profile: None,
            redirect_target: None,
            default_delay: 60,
            default_jitter: 0.0,
            default_lost_limit: 60,
            kill_date: None,
            working_hours: None,
        }
    }
}

impl ListenerOptions {
    fn is_set(&self, option: &str) -> bool {
        match option {
            "host" => self.host.is_some(),
            "port" => self.port.is_some(),
            "cert_path" => self.cert_path.is_some(),
            "profile" => self.profile.is_some(),
            "redirect_target" => self.redirect_target.is_some(),
            _ => false,
        }
    }
}

/// A named listener definition. Persisted independently of running state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    /// Unique listener name.
    pub name: String,
    /// Transport variant.
    pub kind: ListenerKind,
    /// Option set.
    pub options: ListenerOptions,
    /// Whether the endpoint should be serving; restored at process start.
    pub running: bool,
}

impl Listener {
    /// Build a validated listener definition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming every missing required option
    /// for the kind, or an out-of-range default.
    pub fn new(name: impl Into<String>, kind: ListenerKind, options: ListenerOptions) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Validation("listener name must not be empty".into()));
        }

        let missing: Vec<&str> = kind
            .required_options()
            .iter()
            .copied()
            .filter(|option| !options.is_set(option))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "listener '{name}' ({}) is missing required options: {}",
                kind.as_str(),
                missing.join(", ")
            )));
        }

        if options.default_delay == 0 {
            return Err(AppError::Validation("default_delay must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&options.default_jitter) {
            return Err(AppError::Validation(format!(
                "default_jitter must be within [0, 1], got {}",
                options.default_jitter
            )));
        }

        Ok(Self {
            name,
            kind,
            options,
            running: false,
        })
    }

    /// Socket address string the endpoint binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if host or port is unset; `new`
    /// guarantees both for every kind.
    pub fn bind_addr(&self) -> Result<String> {
        let host = self
            .options
            .host
            .as_deref()
            .ok_or_else(|| AppError::Validation(format!("listener '{}' has no host", self.name)))?;
        let port = self
            .options
            .port
            .ok_or_else(|| AppError::Validation(format!("listener '{}' has no port", self.name)))?;
        Ok(format!("{host}:{port}"))
    }
}
