use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Authorization`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// Returns true for every status the server never moves out of.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuthorizationStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Deactivated => "deactivated",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Revoked => "revoked",
        }
    }
}

/// Proof-of-control record for one identifier of an order, see [RFC 8555 §7.1.4].
///
/// The server creates one per identifier when the order is created. Authorizations that are
/// still valid from an earlier order of the same account may be reused.
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Base domain, without `*.` for wildcard orders.
    pub identifier: api::Identifier,

    pub status: AuthorizationStatus,

    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Offered challenges while pending; afterwards the one that was attempted.
    pub challenges: Vec<api::Challenge>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,
}

impl Authorization {
    /// Returns true if authorization was created for a wildcard domain.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }

    /// Returns the challenge of the given type (e.g. `dns-01`), if one is offered.
    pub fn challenge(&self, challenge_type: &str) -> Option<&api::Challenge> {
        self.challenges.iter().find(|c| c._type == challenge_type)
    }

    /// Returns the first error reported on any of the challenges.
    ///
    /// For invalid authorizations this is the reason the validation failed.
    pub fn challenge_error(&self) -> Option<&api::Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

/// Payload that deactivates an authorization.
///
/// See [RFC 8555 §7.5.2].
///
/// [RFC 8555 §7.5.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.5.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeactivateAuthorization {
    status: AuthorizationStatus,
}

impl Default for DeactivateAuthorization {
    fn default() -> Self {
        Self {
            status: AuthorizationStatus::Deactivated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVALID: &str = r#"{
        "identifier": { "type": "dns", "value": "martintest.foobar.com" },
        "status": "invalid",
        "challenges": [
            {
                "type": "dns-01",
                "status": "invalid",
                "error": {
                    "type": "urn:ietf:params:acme:error:dns",
                    "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.martintest.foobar.com",
                    "status": 400
                },
                "url": "https://example.com/acme/challenge/afyChhlFB8GLLmIqEnqqcXzX0Ss3GBw6oUlKAGDG6lY/221695600",
                "token": "YsNqBWZnyYjDun3aUC2CkCopOaqZRrI5hp3tUjxPLQU"
            }
        ]
    }"#;

    #[test]
    fn invalid_authorization_error() {
        let auth: Authorization = serde_json::from_str(INVALID).unwrap();
        assert!(auth.status.is_terminal());
        assert!(auth.challenge("http-01").is_none());

        let problem = auth.challenge_error().unwrap();
        assert_eq!(problem._type, "urn:ietf:params:acme:error:dns");
        assert_eq!(problem.status, Some(400));
    }

    #[test]
    fn deactivate_payload() {
        let json = serde_json::to_string(&DeactivateAuthorization::default()).unwrap();
        assert_eq!(json, r#"{"status":"deactivated"}"#);
    }
}
