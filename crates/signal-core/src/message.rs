//! WebRTC signaling payloads exchanged between peers.
//!
//! The relay forwards payloads verbatim and never looks inside them; this
//! model is for peers (see the client crate) and tests.
//!
//! Two wire shapes are understood:
//! - uniform tagged: every payload carries `"type"`, one of `OFFER`, `ANSWER`
//!   or `CANDIDATE`;
//! - legacy: ICE candidates are untagged and recognised by the presence of a
//!   `serverUrl` field.

use crate::error::{SignalError, SignalResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag used for ICE candidates in the uniform tagged form.
pub const CANDIDATE_TAG: &str = "CANDIDATE";

/// Field whose presence marks a legacy (untagged) ICE candidate.
const LEGACY_CANDIDATE_FIELD: &str = "serverUrl";

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
}

/// A peer's proposed (offer) or accepted (answer) media configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text. Accepts `sdp` as an alias on input.
    #[serde(alias = "sdp", default)]
    pub description: String,
}

/// A network path candidate for reaching a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: i32,
    #[serde(default)]
    pub sdp: String,
    #[serde(rename = "serverUrl", default)]
    pub server_url: String,
}

/// A decoded signaling payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalMessage {
    /// Build an offer from raw SDP.
    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalMessage::Offer(SessionDescription {
            sdp_type: SdpType::Offer,
            description: sdp.into(),
        })
    }

    /// Build an answer from raw SDP.
    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalMessage::Answer(SessionDescription {
            sdp_type: SdpType::Answer,
            description: sdp.into(),
        })
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Candidate(_) => "candidate",
        }
    }

    /// Decode a text payload.
    ///
    /// Returns `Ok(None)` for well-formed JSON objects that are not signaling
    /// payloads (unknown or missing `type` and no `serverUrl`); peers skip
    /// those. Anything containing `serverUrl` is treated as a candidate,
    /// matching older peers that never tag candidates.
    pub fn parse(text: &str) -> SignalResult<Option<Self>> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value
            .as_object()
            .ok_or_else(|| SignalError::InvalidMessage("payload is not a JSON object".into()))?;

        if obj.contains_key(LEGACY_CANDIDATE_FIELD) {
            let candidate: IceCandidate = serde_json::from_value(value)?;
            return Ok(Some(SignalMessage::Candidate(candidate)));
        }

        let tag = obj.get("type").and_then(Value::as_str);
        let message = match tag {
            Some("OFFER") => SignalMessage::Offer(serde_json::from_value(value)?),
            Some("ANSWER") => SignalMessage::Answer(serde_json::from_value(value)?),
            Some(CANDIDATE_TAG) => SignalMessage::Candidate(serde_json::from_value(value)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Encode in the uniform tagged form.
    pub fn to_json(&self) -> SignalResult<String> {
        let mut value = self.to_untagged_value()?;
        if let Value::Object(ref mut obj) = value {
            let tag = match self {
                SignalMessage::Offer(_) => "OFFER",
                SignalMessage::Answer(_) => "ANSWER",
                SignalMessage::Candidate(_) => CANDIDATE_TAG,
            };
            obj.insert("type".into(), Value::String(tag.into()));
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Encode for peers that expect untagged candidates.
    pub fn to_legacy_json(&self) -> SignalResult<String> {
        match self {
            SignalMessage::Candidate(c) => Ok(serde_json::to_string(c)?),
            _ => self.to_json(),
        }
    }

    fn to_untagged_value(&self) -> SignalResult<Value> {
        let value = match self {
            SignalMessage::Offer(d) | SignalMessage::Answer(d) => serde_json::to_value(d)?,
            SignalMessage::Candidate(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offer_with_sdp_alias() {
        let msg = SignalMessage::parse(r#"{"type":"OFFER","sdp":"x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg, SignalMessage::offer("x"));
    }

    #[test]
    fn parses_answer_with_description_field() {
        let msg = SignalMessage::parse(r#"{"type":"ANSWER","description":"v=0"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg, SignalMessage::answer("v=0"));
    }

    #[test]
    fn legacy_candidate_recognised_by_server_url() {
        let text = r#"{"sdpMid":"0","sdpMLineIndex":1,"sdp":"candidate:1 1 udp","serverUrl":""}"#;
        match SignalMessage::parse(text).unwrap() {
            Some(SignalMessage::Candidate(c)) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_m_line_index, 1);
                assert_eq!(c.sdp, "candidate:1 1 udp");
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn server_url_wins_over_type_tag() {
        let text = r#"{"type":"OFFER","serverUrl":"stun:x","sdp":"c"}"#;
        let msg = SignalMessage::parse(text).unwrap().unwrap();
        assert_eq!(msg.kind(), "candidate");
    }

    #[test]
    fn tagged_candidate_without_server_url() {
        let text = r#"{"type":"CANDIDATE","sdpMid":"audio","sdpMLineIndex":0,"sdp":"c"}"#;
        let msg = SignalMessage::parse(text).unwrap().unwrap();
        assert_eq!(msg.kind(), "candidate");
    }

    #[test]
    fn unknown_objects_are_skipped() {
        assert!(SignalMessage::parse(r#"{"type":"BYE"}"#).unwrap().is_none());
        assert!(SignalMessage::parse(r#"{"hello":1}"#).unwrap().is_none());
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            SignalMessage::parse("[1,2]"),
            Err(SignalError::InvalidMessage(_))
        ));
        assert!(matches!(
            SignalMessage::parse("hello"),
            Err(SignalError::Codec(_))
        ));
    }

    #[test]
    fn tagged_encoding_carries_type_for_candidates() {
        let msg = SignalMessage::Candidate(IceCandidate {
            sdp_mid: Some("0".into()),
            sdp_m_line_index: 0,
            sdp: "c".into(),
            server_url: "stun:example.org".into(),
        });
        let tagged: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(tagged["type"], "CANDIDATE");

        let legacy: Value = serde_json::from_str(&msg.to_legacy_json().unwrap()).unwrap();
        assert!(legacy.get("type").is_none());
        assert_eq!(legacy["serverUrl"], "stun:example.org");
    }

    #[test]
    fn offer_encoding_is_readable_by_parse() {
        let json = SignalMessage::offer("v=0").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "OFFER");
        assert_eq!(value["description"], "v=0");
        assert_eq!(
            SignalMessage::parse(&json).unwrap(),
            Some(SignalMessage::offer("v=0"))
        );
    }
}
