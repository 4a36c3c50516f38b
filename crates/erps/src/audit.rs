//! Audit trail and logging macros.
//!
//! Instance configuration, operator commands, ring (de)activation and daemon
//! lifecycle steps produce an [`AuditRecord`]. [`audit_log!`] emits it on the
//! `audit` tracing target with the full record attached as JSON:
//!
//! | Outcome | Level |
//! |---------|-------|
//! | Success | info |
//! | InProgress | debug |
//! | Failure / Denied | warn |
//!
//! Diagnostics go through [`debug_log!`], [`info_log!`], [`warn_log!`] and
//! [`error_log!`], which tag every event with the emitting component as
//! `source`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// An existing instance was reconfigured
    ConfigurationChange,
    ResourceCreate,
    ResourceDelete,
    /// Forced/manual switch, clear, daemon stop
    AdminAction,
    /// A ring was activated or deactivated in hardware
    ProtectionState,
    SystemLifecycle,
    /// An instance dropped to InternalError
    ErrorCondition,
}

impl AuditCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::AdminAction => "ADMIN_ACTION",
            AuditCategory::ProtectionState => "PROTECTION_STATE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::ErrorCondition => "ERROR_CONDITION",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    /// Rejected by validation before anything changed
    Denied,
}

impl AuditOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::InProgress => "in_progress",
            AuditOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Emitting component, e.g. "ErpsManager"
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Usually the ERPS instance number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// New record stamped now, outcome `InProgress`.
    pub fn new(category: AuditCategory, source: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches an error. A record that is not already `Denied` becomes a
    /// `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        if self.outcome != AuditOutcome::Denied {
            self.outcome = AuditOutcome::Failure;
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"audit_encode_error":"{}"}}"#, e))
    }

    /// Emits the record on the `audit` target. Use [`audit_log!`].
    pub fn emit(&self) {
        let object_id = self.object_id.as_deref().unwrap_or("");
        let json = self.to_json();
        match self.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object_id,
                audit_json = %json,
                "AUDIT: {} {} {}", self.category, self.action, self.outcome
            ),
            AuditOutcome::InProgress => tracing::debug!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object_id,
                audit_json = %json,
                "AUDIT: {} {} {}", self.category, self.action, self.outcome
            ),
            AuditOutcome::Failure | AuditOutcome::Denied => tracing::warn!(
                target: "audit",
                category = self.category.as_str(),
                source = %self.source,
                object_id,
                error = self.error.as_deref().unwrap_or(""),
                audit_json = %json,
                "AUDIT: {} {} {}", self.category, self.action, self.outcome
            ),
        }
    }
}

/// Debug-level event tagged with its source component.
///
/// ```ignore
/// debug_log!("ErpsBase", inst = 1, state = %node_state, "state machine ran");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(source = $source, $($arg)*)
    };
}

#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(source = $source, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(source = $source, $($arg)*)
    };
}

#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(source = $source, $($arg)*)
    };
}

/// Emits an [`AuditRecord`](crate::audit::AuditRecord).
///
/// ```ignore
/// audit_log!(AuditRecord::new(AuditCategory::AdminAction, "ErpsManager", "control_set")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("1"));
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Installs a JSON `tracing-subscriber` formatter. `RUST_LOG` wins over
/// `log_level` when set.
pub fn init_json_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true).with_line_number(true))
        .init();
}
