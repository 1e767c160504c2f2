use serde::{Deserialize, Serialize};

use crate::api;

/// Challenge status, see [RFC 8555 §7.1.6].
///
/// `pending` until the client responds, `processing` while the server validates, then `valid` or
/// `invalid`.
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// One way offered by the server to prove control of an authorization's identifier.
///
/// See [RFC 8555 §7.1.5].
///
/// ```json
/// {
///   "type": "dns-01",
///   "status": "invalid",
///   "url": "https://example.com/acme/chall/prV_B7yEyA4",
///   "token": "DGyRejmCefe7v4NfDGDKfA",
///   "error": {
///     "type": "urn:ietf:params:acme:error:dns",
///     "detail": "No TXT record found at _acme-challenge.example.org"
///   }
/// }
/// ```
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// `dns-01`, `http-01`, `tls-alpn-01`, or a type this client doesn't know.
    #[serde(rename = "type")]
    pub _type: String,

    /// Posting `{}` here asks the server to validate.
    pub url: String,

    pub status: ChallengeStatus,

    /// RFC 3339 timestamp of successful validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,

    /// Why validation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    /// Random value the proof is derived from.
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_challenge_keeps_error() {
        let challenge: Challenge = serde_json::from_str(
            r#"{
                "type": "dns-01",
                "status": "invalid",
                "url": "https://example.com/acme/chall/prV_B7yEyA4",
                "token": "DGyRejmCefe7v4NfDGDKfA",
                "error": {
                    "type": "urn:ietf:params:acme:error:dns",
                    "detail": "No TXT record found at _acme-challenge.example.org"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(challenge.status, ChallengeStatus::Invalid);
        assert_eq!(challenge.validated, None);
        assert_eq!(
            challenge.error.unwrap()._type,
            "urn:ietf:params:acme:error:dns"
        );
    }
}
