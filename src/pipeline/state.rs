//! Capture device state management

use std::time::Instant;

/// Capture device state machine
///
/// A device starts `Idle`, moves to `Capturing` when a session starts, and
/// ends up in `Error` when a session fails. Leaving `Error` needs an explicit
/// stop before a new session may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session is running
    Idle,

    /// A session is running
    Capturing {
        /// When the session started
        started_at: Instant,
    },

    /// The last session failed and has not been acknowledged yet
    Error,
}

impl DeviceState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &DeviceState) -> bool {
        use DeviceState::*;

        match (self, target) {
            (Idle, Capturing { .. }) => true,
            (Capturing { .. }, Idle) => true,
            (Capturing { .. }, Error) => true,
            (Error, Idle) => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            DeviceState::Idle => "Idle",
            DeviceState::Capturing { .. } => "Capturing",
            DeviceState::Error => "Error",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DeviceState::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, DeviceState::Capturing { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DeviceState::Error)
    }

    /// Get the duration since the session started (if capturing)
    pub fn capturing_duration(&self) -> Option<std::time::Duration> {
        if let DeviceState::Capturing { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = DeviceState::Idle;
        let capturing = DeviceState::Capturing {
            started_at: Instant::now(),
        };
        let error = DeviceState::Error;

        assert!(idle.can_transition_to(&capturing));
        assert!(capturing.can_transition_to(&idle));
        assert!(capturing.can_transition_to(&error));
        assert!(error.can_transition_to(&idle));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = DeviceState::Idle;
        let capturing = DeviceState::Capturing {
            started_at: Instant::now(),
        };
        let error = DeviceState::Error;

        assert!(!idle.can_transition_to(&error)); // only a session can fail
        assert!(!error.can_transition_to(&capturing)); // must be acknowledged first
        assert!(!capturing.can_transition_to(&capturing));
        assert!(!idle.can_transition_to(&idle));
    }

    #[test]
    fn test_state_checks() {
        let capturing = DeviceState::Capturing {
            started_at: Instant::now(),
        };

        assert!(capturing.is_capturing());
        assert!(!capturing.is_idle());
        assert!(capturing.capturing_duration().is_some());

        assert!(DeviceState::Idle.is_idle());
        assert!(DeviceState::Error.is_error());
        assert!(DeviceState::Error.capturing_duration().is_none());
        assert_eq!(DeviceState::Error.to_string(), "Error");
    }
}
