//! Input Limits
//!
//! Validation for untrusted input entering the conductor:
//! - Provider tokens typed by the user
//! - Turn rate per user
//!
//! All validation is fail-safe: when in doubt, reject the input.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Length of the sliding rate-limit window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Configuration limits for the conductor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorLimits {
    /// Maximum token length in bytes after trimming (default: 4096)
    pub max_token_length: usize,
    /// Maximum turns per user per minute (default: 30)
    pub max_turns_per_minute: u32,
}

impl Default for ConductorLimits {
    fn default() -> Self {
        Self {
            max_token_length: 4096,
            max_turns_per_minute: 30,
        }
    }
}

/// Result of input validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is valid
    Valid,
    /// Input was empty after trimming
    Empty,
    /// Input is invalid with reason
    Invalid(String),
}

impl ValidationResult {
    /// Check if the result indicates valid input
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Get the error message if invalid
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Empty => Some("The token cannot be empty."),
            Self::Invalid(msg) => Some(msg),
        }
    }
}

/// Validator for user-supplied text
#[derive(Clone, Debug, Default)]
pub struct InputValidator {
    limits: ConductorLimits,
}

impl InputValidator {
    /// Create a new input validator with the given limits
    #[must_use]
    pub fn new(limits: ConductorLimits) -> Self {
        Self { limits }
    }

    /// Validate a provider token
    ///
    /// The token is checked after trimming surrounding whitespace.
    #[must_use]
    pub fn validate_token(&self, raw: &str) -> ValidationResult {
        let token = raw.trim();
        if token.is_empty() {
            return ValidationResult::Empty;
        }

        if token.len() > self.limits.max_token_length {
            return ValidationResult::Invalid(format!(
                "The token is too long ({} characters, max {}).",
                token.len(),
                self.limits.max_token_length
            ));
        }

        if token.chars().any(char::is_control) {
            return ValidationResult::Invalid(
                "The token contains invalid characters.".to_string(),
            );
        }

        ValidationResult::Valid
    }

    /// Get the current limits
    #[must_use]
    pub fn limits(&self) -> &ConductorLimits {
        &self.limits
    }
}

/// Sliding one-minute turn counter
#[derive(Clone, Debug, Default)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
}

impl RateWindow {
    /// Record a turn at `now`
    ///
    /// Returns `false` if the turn exceeds `limit` within the window. Rejected
    /// turns are not recorded. A limit of zero disables the check.
    pub fn admit(&mut self, now: Instant, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }

        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= RATE_WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= limit as usize {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Turns counted in the current window
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether no turns are counted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
