//! Callbacks for inbound signaling events.

use signal_core::{IceCandidate, SessionDescription, SignalMessage};
use tracing::debug;

/// Receives signaling events from a [`SignalingClient`](crate::SignalingClient).
///
/// Callbacks run on the client's dispatch task, in arrival order; keep them
/// short or hand work off.
pub trait SignalingListener: Send + Sync {
    /// The WebSocket to the relay is open.
    fn on_connection_established(&self);

    fn on_offer_received(&self, description: SessionDescription);

    fn on_answer_received(&self, description: SessionDescription);

    fn on_ice_candidate_received(&self, candidate: IceCandidate);

    /// The relay closed the connection or the transport failed.
    fn on_closed(&self) {}
}

/// Decode one text frame and hand it to the listener.
///
/// Payloads that are not signaling messages are skipped.
pub(crate) fn dispatch_text(listener: &dyn SignalingListener, text: &str) {
    match SignalMessage::parse(text) {
        Ok(Some(SignalMessage::Offer(d))) => listener.on_offer_received(d),
        Ok(Some(SignalMessage::Answer(d))) => listener.on_answer_received(d),
        Ok(Some(SignalMessage::Candidate(c))) => listener.on_ice_candidate_received(c),
        Ok(None) => debug!("ignoring non-signaling payload"),
        Err(e) => debug!(error = %e, "ignoring malformed payload"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Listener that records every callback as a short string.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub events: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl SignalingListener for Recorder {
        fn on_connection_established(&self) {
            self.push("established".into());
        }
        fn on_offer_received(&self, description: SessionDescription) {
            self.push(format!("offer {}", description.description));
        }
        fn on_answer_received(&self, description: SessionDescription) {
            self.push(format!("answer {}", description.description));
        }
        fn on_ice_candidate_received(&self, candidate: IceCandidate) {
            self.push(format!("candidate {}", candidate.sdp));
        }
        fn on_closed(&self) {
            self.push("closed".into());
        }
    }

    #[test]
    fn dispatches_by_message_kind() {
        let recorder = Recorder::default();
        dispatch_text(&recorder, r#"{"type":"OFFER","sdp":"v=0 offer"}"#);
        dispatch_text(&recorder, r#"{"type":"ANSWER","sdp":"v=0 answer"}"#);
        dispatch_text(
            &recorder,
            r#"{"serverUrl":"stun:x","sdpMid":"0","sdpMLineIndex":0,"sdp":"candidate:1"}"#,
        );
        assert_eq!(
            recorder.events(),
            vec!["offer v=0 offer", "answer v=0 answer", "candidate candidate:1"]
        );
    }

    #[test]
    fn skips_unknown_and_malformed_payloads() {
        let recorder = Recorder::default();
        dispatch_text(&recorder, r#"{"type":"BYE"}"#);
        dispatch_text(&recorder, "not json");
        dispatch_text(&recorder, "[1,2]");
        assert!(recorder.events().is_empty());
    }
}
