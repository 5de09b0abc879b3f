//! Category-coded errors for the flow engine.
//!
//! Command handlers never raise — they return a failing [`CommandResult`]
//! (see [`crate::step`]) — but everything below the executor (transport,
//! session, resolver) surfaces failures through [`FlowError`] so the
//! executor can classify them into a [`StepStatus`](crate::step::StepStatus)
//! and [`Category`] without string-sniffing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad error family, used by the executor to set `StepResult.category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Assertion,
    Timeout,
    Connection,
    App,
    Config,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Assertion => "assertion",
            Category::Timeout => "timeout",
            Category::Connection => "connection",
            Category::App => "app",
            Category::Config => "config",
        };
        f.write_str(s)
    }
}

/// A short, stable machine code within a [`Category`].
///
/// Kept as a plain string rather than a closed enum: the automation server
/// and transport surface their own codes (e.g. raw HTTP status text) that
/// don't map onto the handful of constants named below, and callers match
/// on those known constants via `==`.
pub type Code = &'static str;

pub mod codes {
    use super::Code;

    pub const ELEMENT_NOT_FOUND: Code = "element_not_found";
    pub const ELEMENT_NOT_VISIBLE: Code = "element_not_visible";
    pub const TEXT_MISMATCH: Code = "text_mismatch";
    pub const CONDITION_NOT_MET: Code = "condition_not_met";

    pub const TIMEOUT: Code = "timeout";
    pub const WAIT_TIMEOUT: Code = "wait_timeout";

    pub const DEVICE_DISCONNECTED: Code = "device_disconnected";
    pub const SERVER_UNREACHABLE: Code = "server_unreachable";

    pub const APP_CRASHED: Code = "app_crashed";
    pub const APP_NOT_INSTALLED: Code = "app_not_installed";
    pub const APP_NOT_RESPONDING: Code = "app_not_responding";

    pub const INVALID_CONFIG: Code = "invalid_config";
    pub const MISSING_REQUIRED: Code = "missing_required";
}

/// A category-coded, wrappable error.
///
/// `withCause`/`withMessage`/`withDetails` are modeled as consuming builder
/// methods that shallow-clone `self` — the original value handed to them is
/// untouched because they take `self` by value and return a new one;
/// nothing mutates in place.
#[derive(Debug, Clone)]
pub struct FlowError {
    category: Category,
    code: Code,
    message: String,
    details: BTreeMap<String, String>,
    cause: Option<Box<FlowError>>,
}

impl FlowError {
    pub fn new(category: Category, code: Code, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
            details: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }

    /// The immediate cause, if this error wraps another.
    pub fn cause(&self) -> Option<&FlowError> {
        self.cause.as_deref()
    }

    /// `true` iff `self` or any cause in the chain has `code`.
    pub fn is(&self, code: Code) -> bool {
        self.code == code || self.cause().map_or(false, |c| c.is(code))
    }

    #[must_use]
    pub fn with_cause(mut self, cause: FlowError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_details<I, K, V>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in details {
            self.details.insert(k.into(), v.into());
        }
        self
    }

    // ── Convenience constructors for the well-known codes ──────────────

    pub fn element_not_found(message: impl Into<String>) -> Self {
        Self::new(Category::Assertion, codes::ELEMENT_NOT_FOUND, message)
    }

    pub fn element_not_visible(message: impl Into<String>) -> Self {
        Self::new(Category::Assertion, codes::ELEMENT_NOT_VISIBLE, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Category::Timeout, codes::TIMEOUT, message)
    }

    pub fn server_unreachable(message: impl Into<String>) -> Self {
        Self::new(Category::Connection, codes::SERVER_UNREACHABLE, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(Category::Config, codes::INVALID_CONFIG, message)
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_cause_does_not_mutate_original() {
        let root = FlowError::server_unreachable("connection refused");
        let wrapped = FlowError::element_not_found("no element").with_cause(root.clone());
        assert!(wrapped.cause().is_some());
        assert_eq!(wrapped.cause().unwrap().code(), codes::SERVER_UNREACHABLE);
        assert!(root.cause().is_none());
    }

    #[test]
    fn is_walks_the_cause_chain() {
        let root = FlowError::new(Category::Connection, codes::DEVICE_DISCONNECTED, "gone");
        let mid = FlowError::timeout("deadline exceeded").with_cause(root);
        assert!(mid.is(codes::TIMEOUT));
        assert!(mid.is(codes::DEVICE_DISCONNECTED));
        assert!(!mid.is(codes::APP_CRASHED));
    }

    #[test]
    fn with_details_merges_without_clobbering_message() {
        let e = FlowError::invalid_config("bad selector")
            .with_detail("field", "text")
            .with_details([("selector", "{}")]);
        assert_eq!(e.details().get("field").map(String::as_str), Some("text"));
        assert_eq!(e.details().get("selector").map(String::as_str), Some("{}"));
        assert_eq!(e.message(), "bad selector");
    }

    #[test]
    fn display_includes_category_and_code() {
        let e = FlowError::element_not_found("Login button");
        let s = e.to_string();
        assert!(s.contains("assertion"));
        assert!(s.contains("element_not_found"));
        assert!(s.contains("Login button"));
    }
}
