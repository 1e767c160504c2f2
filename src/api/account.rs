use serde::{Deserialize, Serialize};

/// The status of an [`Account`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// An ACME account resource.
///
/// Represents a set of metadata associated with an account.
///
/// See [RFC 8555 §7.1.2].
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "valid",
///   "contact": [
///     "mailto:cert-admin@example.com",
///     "mailto:admin@example.com"
///   ],
///   "termsOfServiceAgreed": true,
///   "orders": "https://example.com/acme/acct/evOfKhNU60wg/orders"
/// }
/// ```
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

impl Account {
    /// Payload for a newAccount request.
    pub(crate) fn registration(contact: Option<Vec<String>>, terms_agreed: bool) -> Self {
        Self {
            contact,
            terms_of_service_agreed: Some(terms_agreed),
            ..Default::default()
        }
    }

    /// Payload for a newAccount request that must not create an account.
    pub(crate) fn only_return_existing() -> Self {
        Self {
            only_return_existing: Some(true),
            ..Default::default()
        }
    }

    /// Payload for an account update that deactivates the account.
    pub(crate) fn deactivation() -> Self {
        Self {
            status: Some(AccountStatus::Deactivated),
            ..Default::default()
        }
    }

    pub fn is_status_valid(&self) -> bool {
        self.status == Some(AccountStatus::Valid)
    }

    pub fn is_status_deactivated(&self) -> bool {
        self.status == Some(AccountStatus::Deactivated)
    }

    pub fn is_status_revoked(&self) -> bool {
        self.status == Some(AccountStatus::Revoked)
    }

    pub fn terms_of_service_agreed(&self) -> bool {
        self.terms_of_service_agreed.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_return_existing_payload() {
        let json = serde_json::to_string(&Account::only_return_existing()).unwrap();
        assert_eq!(json, r#"{"onlyReturnExisting":true}"#);
    }

    #[test]
    fn deactivation_payload() {
        let json = serde_json::to_string(&Account::deactivation()).unwrap();
        assert_eq!(json, r#"{"status":"deactivated"}"#);
    }
}
