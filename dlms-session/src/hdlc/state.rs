//! HDLC link state

use dlms_core::{DlmsError, DlmsResult};

/// State of the HDLC data link
///
/// ```text
/// Disconnected -> Connecting      (SNRM sent / awaited)
/// Connecting   -> Connected       (UA exchanged)
/// Connected    -> Disconnecting   (DISC sent)
/// any          -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdlcConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

impl HdlcConnectionState {
    pub fn can_send_information(&self) -> bool {
        matches!(self, HdlcConnectionState::Connected)
    }

    /// Check that `next` is reachable from this state
    pub fn validate_transition(&self, next: HdlcConnectionState) -> DlmsResult<()> {
        use HdlcConnectionState::*;
        let allowed = matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Connected)
                | (Connected, Disconnecting)
                | (Connecting, Disconnected)
                | (_, Closed)
        );
        if allowed {
            Ok(())
        } else {
            Err(DlmsError::Protocol(format!(
                "Invalid HDLC state transition {:?} -> {:?}",
                self, next
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use HdlcConnectionState::*;
        assert!(Disconnected.validate_transition(Connecting).is_ok());
        assert!(Connecting.validate_transition(Connected).is_ok());
        assert!(Connected.validate_transition(Disconnecting).is_ok());
        assert!(Disconnecting.validate_transition(Closed).is_ok());
        assert!(Disconnected.validate_transition(Connected).is_err());
        assert!(Closed.validate_transition(Connecting).is_err());
        assert!(Connected.can_send_information());
        assert!(!Connecting.can_send_information());
    }
}
