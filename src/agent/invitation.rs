//! Out-of-band invitation URL decoding.
//!
//! Accepts the three shapes seen in the wild:
//! - `?oob=<base64url json>` (RFC 0434 out-of-band 1.x)
//! - `?_oob=<base64url json>` (same payload, alternate param name)
//! - `?c_i=<base64url json>` (legacy RFC 0160 connection invitation)
//!
//! Padded and unpadded, url-safe and standard base64 are all tolerated.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use url::Url;

use crate::error::BootstrapError;

const OOB_PARAMS: [&str; 2] = ["oob", "_oob"];
const LEGACY_PARAM: &str = "c_i";

/// Handshake protocol implied by a legacy connection invitation.
pub const CONNECTIONS_PROTOCOL: &str = "https://didcomm.org/connections/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationKind {
    OutOfBand,
    LegacyConnection,
}

/// The parts of an invitation the bootstrap sequence cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: String,
    pub kind: InvitationKind,
    pub label: Option<String>,
    /// Empty for connectionless out-of-band messages.
    pub handshake_protocols: Vec<String>,
    pub service_count: usize,
}

impl Invitation {
    pub fn establishes_connection(&self) -> bool {
        !self.handshake_protocols.is_empty()
    }
}

#[derive(Deserialize)]
struct RawInvitation {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    handshake_protocols: Vec<String>,
    #[serde(default)]
    services: Vec<serde_json::Value>,
    #[serde(default, rename = "serviceEndpoint")]
    service_endpoint: Option<String>,
    #[serde(default, rename = "recipientKeys")]
    recipient_keys: Vec<String>,
}

/// Decode an invitation URL into an [`Invitation`].
///
/// Every failure is a [`BootstrapError::Protocol`].
pub fn parse_invitation_url(raw: &str) -> Result<Invitation, BootstrapError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| BootstrapError::Protocol(format!("invalid invitation url: {e}")))?;

    let mut payload = None;
    for (name, value) in url.query_pairs() {
        if OOB_PARAMS.contains(&name.as_ref()) {
            payload = Some((InvitationKind::OutOfBand, value.into_owned()));
            break;
        }
        if name == LEGACY_PARAM {
            payload = Some((InvitationKind::LegacyConnection, value.into_owned()));
            break;
        }
    }
    let (kind, encoded) = payload.ok_or_else(|| {
        BootstrapError::Protocol("invitation url has no oob, _oob or c_i parameter".into())
    })?;

    let json = decode_payload(&encoded)?;
    let parsed: RawInvitation = serde_json::from_slice(&json)
        .map_err(|e| BootstrapError::Protocol(format!("invitation payload is not valid: {e}")))?;

    if parsed.id.trim().is_empty() {
        return Err(BootstrapError::Protocol("invitation has an empty @id".into()));
    }

    match kind {
        InvitationKind::OutOfBand => {
            if !(parsed.kind.contains("out-of-band/1.") && parsed.kind.ends_with("/invitation")) {
                return Err(BootstrapError::Protocol(format!(
                    "unexpected out-of-band message type '{}'",
                    parsed.kind
                )));
            }
            if parsed.services.is_empty() {
                return Err(BootstrapError::Protocol("out-of-band invitation has no services".into()));
            }
            Ok(Invitation {
                id: parsed.id,
                kind,
                label: parsed.label,
                handshake_protocols: parsed.handshake_protocols,
                service_count: parsed.services.len(),
            })
        }
        InvitationKind::LegacyConnection => {
            if !parsed.kind.ends_with("connections/1.0/invitation") {
                return Err(BootstrapError::Protocol(format!(
                    "unexpected connection invitation type '{}'",
                    parsed.kind
                )));
            }
            if parsed.service_endpoint.is_none() || parsed.recipient_keys.is_empty() {
                return Err(BootstrapError::Protocol(
                    "connection invitation lacks serviceEndpoint or recipientKeys".into(),
                ));
            }
            Ok(Invitation {
                id: parsed.id,
                kind,
                label: parsed.label,
                handshake_protocols: vec![CONNECTIONS_PROTOCOL.to_string()],
                service_count: 1,
            })
        }
    }
}

fn decode_payload(encoded: &str) -> Result<Vec<u8>, BootstrapError> {
    // Form decoding turns an unescaped '+' into a space.
    let cleaned = encoded.trim().replace(' ', "+");
    let cleaned = cleaned.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned))
        .map_err(|e| BootstrapError::Protocol(format!("invitation payload is not base64: {e}")))
}

#[cfg(test)]
pub(crate) fn test_invitation_url(id: &str, label: Option<&str>, handshake: bool) -> String {
    let mut body = serde_json::json!({
        "@type": "https://didcomm.org/out-of-band/1.1/invitation",
        "@id": id,
        "services": [{
            "id": "#inline",
            "type": "did-communication",
            "recipientKeys": ["did:key:z6MkpTHR8VNsBxYAAWHut2Geadd9jSwuBV8xRoAnwWsdvktH"],
            "serviceEndpoint": "https://mediator.example"
        }],
    });
    if let Some(label) = label {
        body["label"] = serde_json::Value::from(label);
    }
    if handshake {
        body["handshake_protocols"] = serde_json::json!(["https://didcomm.org/didexchange/1.0"]);
    }
    let encoded = URL_SAFE_NO_PAD.encode(body.to_string());
    format!("https://mediator.example/invite?oob={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn parses_out_of_band_invitation() {
        let url = test_invitation_url("inv-1", Some("Mediator"), true);
        let inv = parse_invitation_url(&url).unwrap();
        assert_eq!(inv.id, "inv-1");
        assert_eq!(inv.kind, InvitationKind::OutOfBand);
        assert_eq!(inv.label.as_deref(), Some("Mediator"));
        assert!(inv.establishes_connection());
        assert_eq!(inv.service_count, 1);
    }

    #[test]
    fn connectionless_invitation_has_no_handshake() {
        let url = test_invitation_url("inv-2", None, false);
        let inv = parse_invitation_url(&url).unwrap();
        assert!(!inv.establishes_connection());
        assert_eq!(inv.label, None);
    }

    #[test]
    fn underscore_param_and_padded_standard_base64_accepted() {
        let body = serde_json::json!({
            "@type": "https://didcomm.org/out-of-band/1.0/invitation",
            "@id": "inv-3",
            "handshake_protocols": ["https://didcomm.org/connections/1.0"],
            "services": ["did:sov:LjgpST2rjsoxYegQDRm7EL"],
        });
        let encoded = STANDARD.encode(body.to_string());
        let url = Url::parse_with_params("https://m.example/oob", &[("_oob", encoded)]).unwrap();
        let inv = parse_invitation_url(url.as_str()).unwrap();
        assert_eq!(inv.id, "inv-3");
    }

    #[test]
    fn legacy_connection_invitation_implies_connections_protocol() {
        let body = serde_json::json!({
            "@type": "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0/invitation",
            "@id": "legacy-1",
            "label": "Old Mediator",
            "recipientKeys": ["8HH5gYEeNc3z7PYXmd54d4x6qAfCNrqQqEB3nS7Zfu7K"],
            "serviceEndpoint": "https://old.example",
        });
        let url = format!("https://old.example?c_i={}", URL_SAFE_NO_PAD.encode(body.to_string()));
        let inv = parse_invitation_url(&url).unwrap();
        assert_eq!(inv.kind, InvitationKind::LegacyConnection);
        assert_eq!(inv.handshake_protocols, vec![CONNECTIONS_PROTOCOL.to_string()]);
    }

    #[test]
    fn missing_param_is_protocol_error() {
        let err = parse_invitation_url("https://mediator.example/invite").unwrap_err();
        assert!(matches!(err, BootstrapError::Protocol(_)));
    }

    #[test]
    fn garbage_payload_is_protocol_error() {
        let err = parse_invitation_url("https://mediator.example/oob?_oob=abc").unwrap_err();
        assert!(matches!(err, BootstrapError::Protocol(_)));
    }

    #[test]
    fn wrong_message_type_rejected() {
        let body = serde_json::json!({
            "@type": "https://didcomm.org/basicmessage/1.0/message",
            "@id": "x",
            "services": ["did:sov:abc"],
        });
        let url = format!("https://m.example?oob={}", URL_SAFE_NO_PAD.encode(body.to_string()));
        let err = parse_invitation_url(&url).unwrap_err();
        assert!(err.to_string().contains("unexpected out-of-band message type"));
    }

    #[test]
    fn invitation_without_services_rejected() {
        let body = serde_json::json!({
            "@type": "https://didcomm.org/out-of-band/1.1/invitation",
            "@id": "x",
            "services": [],
        });
        let url = format!("https://m.example?oob={}", URL_SAFE_NO_PAD.encode(body.to_string()));
        assert!(parse_invitation_url(&url).is_err());
    }
}
