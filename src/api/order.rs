use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Order`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        }
    }
}

/// A certificate request and its progress towards issuance, see [RFC 8555 §7.1.3].
///
/// Only `identifiers` is sent when creating an order. Everything else is filled in by the server.
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    /// RFC 3339 timestamp after which the server drops the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    /// Why the order became invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    /// One authorization URL per identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizations: Option<Vec<String>>,

    /// Where the CSR is posted once the order is `ready`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finalize: String,

    /// Certificate URL, once the order is `valid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Order {
    pub(crate) fn from_identifiers(identifiers: Vec<api::Identifier>) -> Self {
        Self {
            identifiers,
            ..Default::default()
        }
    }

    /// Returns all domains associated with this order.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    // Let's Encrypt was observed to return domains in alternate order which
    // may flip primary with SAN(s).
    //
    // This overwrites self without changing the order of the domains.
    pub(crate) fn overwrite(&mut self, mut from_api: Self) -> eyre::Result<()> {
        // Make sure the lists are the same.
        if from_api.identifiers.len() != self.identifiers.len()
            || from_api
                .identifiers
                .iter()
                .any(|id| !self.identifiers.contains(id))
        {
            return Err(eyre::eyre!(
                "Order domain(s) mismatch: had {:?} and got {:?}",
                self.identifiers,
                from_api.identifiers
            ));
        }
        // Then preserve the original order.
        from_api.identifiers = std::mem::take(&mut self.identifiers);
        *self = from_api;
        Ok(())
    }

    pub fn is_status(&self, status: OrderStatus) -> bool {
        self.status == Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(domains: &[&str]) -> Order {
        Order::from_identifiers(domains.iter().map(|d| api::Identifier::dns(d)).collect())
    }

    #[test]
    fn new_order_payload() {
        let json = serde_json::to_string(&order(&["example.com"])).unwrap();
        assert_eq!(
            json,
            r#"{"identifiers":[{"type":"dns","value":"example.com"}]}"#
        );
    }

    #[test]
    fn overwrite_keeps_requested_order() {
        let mut requested = order(&["a.example.com", "b.example.com"]);
        let mut from_api = order(&["b.example.com", "a.example.com"]);
        from_api.status = Some(OrderStatus::Pending);
        from_api.finalize = "https://example.com/finalize/1".to_owned();

        requested.overwrite(from_api).unwrap();
        assert_eq!(requested.domains(), ["a.example.com", "b.example.com"]);
        assert!(requested.is_status(OrderStatus::Pending));
    }

    #[test]
    fn overwrite_rejects_other_identifiers() {
        let mut requested = order(&["a.example.com"]);
        let from_api = order(&["c.example.com"]);
        assert!(requested.overwrite(from_api).is_err());
    }
}
