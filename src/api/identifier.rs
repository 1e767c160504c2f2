use std::fmt;

use serde::{Deserialize, Serialize};

/// Subject of an order or authorization. Only `dns` identifiers are requested by this client.
///
/// For wildcard orders the authorization carries the base domain (`example.com`) and sets its
/// `wildcard` flag, while the order keeps `*.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub(crate) fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }

    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self._type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_identifier() {
        let id = Identifier::dns("*.example.com");
        assert!(id.is_type_dns());
        assert!(id.is_wildcard());
        assert_eq!(id.to_string(), "dns:*.example.com");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            r#"{"type":"dns","value":"*.example.com"}"#
        );
    }
}
