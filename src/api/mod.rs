//! JSON API payloads.
//!
//! Not intended to be used directly. Provided to aid debugging.

use std::fmt;

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod challenge;
mod directory;
mod identifier;
mod order;
mod payload;

pub use self::{
    account::{Account, AccountStatus},
    authorization::{Authorization, AuthorizationStatus, DeactivateAuthorization},
    challenge::{Challenge, ChallengeStatus},
    directory::{Directory, DirectoryMeta},
    identifier::Identifier,
    order::{Order, OrderStatus},
    payload::{Finalize, Revocation},
};

/// Serializes to `{}`.
///
/// Posted to a challenge URL to ask the server to start validating it.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// An RFC 7807 problem document, as returned by ACME servers on errors.
///
/// See [RFC 8555 §6.7](https://datatracker.ietf.org/doc/html/rfc8555#section-6.7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// HTTP status code of the response carrying the problem.
    ///
    /// Filled in from the response when the server leaves it out of the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,
}

const ERROR_NS: &str = "urn:ietf:params:acme:error:";

impl Problem {
    /// Returns true if problem type is `badNonce`.
    pub fn is_bad_nonce(&self) -> bool {
        self.is_type("badNonce")
    }

    /// Returns true if the server has no account for the key used (`accountDoesNotExist`).
    pub fn is_account_does_not_exist(&self) -> bool {
        self.is_type("accountDoesNotExist")
    }

    /// Returns true if the certificate was already revoked (`alreadyRevoked`).
    pub fn is_already_revoked(&self) -> bool {
        self.is_type("alreadyRevoked")
    }

    /// Returns true if the problem was reported with a 5xx status or as `serverInternal`.
    pub fn is_server_error(&self) -> bool {
        self.status.is_some_and(|status| status >= 500) || self.is_type("serverInternal")
    }

    /// Compares the problem type, accepting the RFC 8555 namespace, the pre-RFC `urn:acme:error:`
    /// namespace, and bare names.
    fn is_type(&self, name: &str) -> bool {
        let ty = self._type.as_str();
        ty.strip_prefix(ERROR_NS)
            .or_else(|| ty.strip_prefix("urn:acme:error:"))
            .unwrap_or(ty)
            == name
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            _ => write!(f, "{}", self._type)?,
        }

        if let Some(subproblems) = &self.subproblems {
            for sub in subproblems {
                write!(f, "; {sub}")?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<identifier::Identifier>,
}

impl fmt::Display for Subproblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(identifier) = &self.identifier {
            write!(f, "[{}] ", identifier.value)?;
        }

        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type),
            _ => write!(f, "{}", self._type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_empty_object() {
        let x = serde_json::to_string(&EmptyObject).unwrap();
        assert_eq!("{}", x);
    }

    #[test]
    fn problem_type_namespaces() {
        let rfc = Problem {
            _type: "urn:ietf:params:acme:error:badNonce".to_owned(),
            ..Default::default()
        };
        assert!(rfc.is_bad_nonce());

        let legacy = Problem {
            _type: "urn:acme:error:badNonce".to_owned(),
            ..Default::default()
        };
        assert!(legacy.is_bad_nonce());

        let other = Problem {
            _type: "urn:ietf:params:acme:error:badNonceish".to_owned(),
            ..Default::default()
        };
        assert!(!other.is_bad_nonce());
    }

    #[test]
    fn problem_with_subproblems() {
        let problem: Problem = serde_json::from_str(
            r#"{
                "type": "urn:ietf:params:acme:error:malformed",
                "detail": "Some of the identifiers requested were rejected",
                "subproblems": [
                    {
                        "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                        "detail": "This CA will not issue for \"example.net\"",
                        "identifier": { "type": "dns", "value": "example.net" }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(problem.subproblems.as_ref().unwrap().len(), 1);
        let msg = problem.to_string();
        assert!(msg.contains("[example.net] urn:ietf:params:acme:error:rejectedIdentifier"));
        assert!(!problem.is_server_error());
    }

    #[test]
    fn problem_server_error() {
        let problem = Problem {
            _type: "about:blank".to_owned(),
            status: Some(503),
            ..Default::default()
        };
        assert!(problem.is_server_error());
    }
}
