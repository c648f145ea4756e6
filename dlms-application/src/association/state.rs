//! Association state machine for DLMS/COSEM connections
//!
//! The states follow one logical connection from transport setup to
//! teardown, on both the client and the server side.

use dlms_core::{DlmsError, DlmsResult};
use std::fmt::{self, Display};

/// Association state
///
/// # State Transitions
///
/// ```text
/// Idle -> AwaitingHandshake -> Associated -> Releasing -> Closed
///              |                   |             |
///              +-------------------+-------------+--> Aborted -> Closed
/// ```
///
/// `Aborted` is reachable from every state except `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AssociationState {
    /// No handshake started
    ///
    /// Server: transport accepted, session not yet built.
    /// Client: settings prepared, AARQ not yet sent.
    #[default]
    Idle,

    /// Waiting for the AARQ (server) or the AARE (client)
    AwaitingHandshake,

    /// AARE accepted, application data may flow
    ///
    /// With an HLS mechanism the client is only authenticated once the
    /// pass 3/4 exchange succeeds; until then only that exchange is
    /// served.
    Associated,

    /// RLRQ sent or received, waiting for the release to complete
    Releasing,

    /// Association torn down by a handshake failure, protocol error,
    /// transport fault or timeout
    Aborted,

    /// Terminal state, the transport is closed
    Closed,
}

impl AssociationState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Associated)
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::AwaitingHandshake | Self::Releasing)
    }

    /// True for `Aborted` and `Closed`
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Aborted | Self::Closed)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: AssociationState) -> bool {
        use AssociationState::*;
        matches!(
            (*self, next),
            (Idle, AwaitingHandshake)
                | (AwaitingHandshake, Associated)
                | (Associated, Releasing)
                | (Releasing, Closed)
                | (Idle, Aborted)
                | (AwaitingHandshake, Aborted)
                | (Associated, Aborted)
                | (Releasing, Aborted)
                | (Aborted, Closed)
                | (Idle, Closed)
        )
    }

    /// Check that `next` is a legal successor of this state
    ///
    /// # Errors
    /// `Protocol` for an illegal transition.
    pub fn validate_transition(&self, next: AssociationState) -> DlmsResult<AssociationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DlmsError::Protocol(format!(
                "Illegal association transition {} -> {}",
                self, next
            )))
        }
    }
}

impl Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::AwaitingHandshake => write!(f, "AWAITING_HANDSHAKE"),
            Self::Associated => write!(f, "ASSOCIATED"),
            Self::Releasing => write!(f, "RELEASING"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssociationState::*;

    #[test]
    fn test_happy_path() {
        let mut state = Idle;
        for next in [AwaitingHandshake, Associated, Releasing, Closed] {
            state = state.validate_transition(next).unwrap();
        }
        assert_eq!(state, Closed);
    }

    #[test]
    fn test_abort_from_any_open_state() {
        for state in [Idle, AwaitingHandshake, Associated, Releasing] {
            assert!(state.can_transition_to(Aborted), "{}", state);
        }
        assert!(!Closed.can_transition_to(Aborted));
        assert!(Aborted.can_transition_to(Closed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(Idle.validate_transition(Associated).is_err());
        assert!(Associated.validate_transition(AwaitingHandshake).is_err());
        assert!(Closed.validate_transition(Idle).is_err());
        assert!(matches!(
            Releasing.validate_transition(Associated),
            Err(DlmsError::Protocol(_))
        ));
    }

    #[test]
    fn test_predicates() {
        assert!(Associated.is_active());
        assert!(AwaitingHandshake.is_pending() && Releasing.is_pending());
        assert!(Aborted.is_terminated() && Closed.is_terminated());
        assert_eq!(AwaitingHandshake.to_string(), "AWAITING_HANDSHAKE");
        assert_eq!(AssociationState::default(), Idle);
    }
}
