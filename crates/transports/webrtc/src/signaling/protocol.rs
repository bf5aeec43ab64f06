//! Session description wire type
//!
//! Serialized exactly like the browser `RTCSessionDescriptionInit`:
//! `{"type":"offer","sdp":"v=0..."}`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session description type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial offer from the dialing side
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer from the accepting side
    Answer,
    /// Rollback of a pending offer
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Offer/answer payload exchanged over the signaling carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the JSON wire form
    pub fn from_json(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Require a specific type, e.g. an answer after sending an offer
    pub fn expect(self, expected: SdpType) -> crate::Result<Self> {
        if self.sdp_type == expected {
            Ok(self)
        } else {
            Err(crate::Error::SignalingError(format!(
                "expected {} but received {}",
                expected, self.sdp_type
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let offer = SessionDescription::offer("O1");
        let json = String::from_utf8(offer.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"O1"}"#);
    }

    #[test]
    fn test_parse_answer() {
        let answer = SessionDescription::from_json(br#"{"type":"answer","sdp":"A1"}"#).unwrap();
        assert_eq!(answer, SessionDescription::answer("A1"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = SessionDescription::from_json(br#"{"type":"hello","sdp":""}"#);
        assert!(matches!(result, Err(crate::Error::SerializationError(_))));
    }

    #[test]
    fn test_expect_mismatch() {
        let offer = SessionDescription::offer("O1");
        let err = offer.expect(SdpType::Answer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Signaling error: expected answer but received offer"
        );
    }
}
