//! Association events for DLMS/COSEM connections
//!
//! Events are local instrumentation: they carry the detailed reason of a
//! rejection, which is never sent to the peer.

use crate::association::state::AssociationState;
use crate::conformance::Conformance;
use std::fmt;
use std::sync::Arc;

/// An event that can occur on an association
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationEvent {
    StateChanged {
        from: AssociationState,
        to: AssociationState,
    },

    /// AARE accepted
    Established {
        conformance: Conformance,
        max_pdu_size: u16,
    },

    /// HLS pass 3/4 completed
    Authenticated,

    /// AARE rejected
    Rejected {
        /// AARE `result` value
        result: u8,
        /// AARE `result-source-diagnostic` value
        diagnostic: u8,
        /// Local detail of the rejection
        reason: String,
    },

    /// HLS pass 3/4 failed
    AuthenticationFailed { details: String },

    Released,

    Aborted { reason: String },
}

impl AssociationEvent {
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Released)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::AuthenticationFailed { .. } | Self::Aborted { .. }
        )
    }

    pub fn description(&self) -> String {
        match self {
            Self::StateChanged { from, to } => format!("State changed {} -> {}", from, to),
            Self::Established {
                conformance,
                max_pdu_size,
            } => format!(
                "Association established (conformance {}, max PDU {})",
                conformance, max_pdu_size
            ),
            Self::Authenticated => "Client authenticated".to_string(),
            Self::Rejected {
                result,
                diagnostic,
                reason,
            } => format!(
                "Association rejected (result {}, diagnostic {}): {}",
                result, diagnostic, reason
            ),
            Self::AuthenticationFailed { details } => format!("Authentication failed: {}", details),
            Self::Released => "Association released".to_string(),
            Self::Aborted { reason } => format!("Association aborted: {}", reason),
        }
    }
}

/// Event listener for association events
///
/// Called synchronously on the task driving the association; implementations
/// must not block.
pub trait AssociationEventListener: Send + Sync {
    fn on_event(&self, event: AssociationEvent);
}

/// Callback-based event listener
pub struct CallbackEventListener<F>
where
    F: Fn(AssociationEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEventListener<F>
where
    F: Fn(AssociationEvent) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> AssociationEventListener for CallbackEventListener<F>
where
    F: Fn(AssociationEvent) + Send + Sync,
{
    fn on_event(&self, event: AssociationEvent) {
        (self.callback)(event);
    }
}

/// Fan-out of events to the registered listeners
#[derive(Clone, Default)]
pub struct EventsEmitter {
    listeners: Arc<Vec<Arc<dyn AssociationEventListener>>>,
}

impl EventsEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn AssociationEventListener>) {
        let mut listeners = self.listeners.iter().cloned().collect::<Vec<_>>();
        listeners.push(listener);
        self.listeners = Arc::new(listeners);
    }

    pub fn emit(&self, event: AssociationEvent) {
        for listener in self.listeners.iter() {
            listener.on_event(event.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for EventsEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsEmitter")
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

/// Listener forwarding events to a tokio channel
#[cfg(feature = "tokio")]
pub mod channel_listener {
    use super::{AssociationEvent, AssociationEventListener};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    pub struct ChannelEventListener {
        tx: UnboundedSender<AssociationEvent>,
    }

    impl ChannelEventListener {
        pub fn new() -> (Self, UnboundedReceiver<AssociationEvent>) {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    impl AssociationEventListener for ChannelEventListener {
        fn on_event(&self, event: AssociationEvent) {
            // receiver may be gone
            let _ = self.tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_types() {
        let event = AssociationEvent::Established {
            conformance: Conformance::GET,
            max_pdu_size: 512,
        };
        assert!(event.is_established());
        assert!(!event.is_failure());
        assert!(event.description().contains("max PDU 512"));

        let event = AssociationEvent::Rejected {
            result: 1,
            diagnostic: 13,
            reason: "wrong password".to_string(),
        };
        assert!(event.is_failure());
        assert!(!event.is_termination());
        assert!(AssociationEvent::Released.is_termination());
    }

    #[test]
    fn test_emitter_fans_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventsEmitter::new();
        assert!(emitter.is_empty());
        for _ in 0..2 {
            let seen = seen.clone();
            emitter.add_listener(Arc::new(CallbackEventListener::new(move |event| {
                seen.lock().unwrap().push(event);
            })));
        }
        emitter.emit(AssociationEvent::Released);
        assert_eq!(seen.lock().unwrap().as_slice(), &[AssociationEvent::Released, AssociationEvent::Released]);
        assert_eq!(format!("{:?}", emitter), "EventsEmitter { listener_count: 2 }");
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_channel_listener() {
        use channel_listener::ChannelEventListener;

        let (listener, mut rx) = ChannelEventListener::new();
        listener.on_event(AssociationEvent::Authenticated);
        assert_eq!(rx.recv().await.unwrap(), AssociationEvent::Authenticated);
    }
}
