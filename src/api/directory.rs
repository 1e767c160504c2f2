use serde::{Deserialize, Serialize};

/// Endpoint map published by an ACME server, see [RFC 8555 §7.1.1].
///
/// This is the only URL a client needs to be configured with; every other resource is found
/// through it.
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,

    /// Only present on servers supporting pre-authorization, which this client doesn't use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,

    pub revoke_cert: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_change: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// Optional server metadata, see [RFC 8555 §9.7.6].
///
/// [RFC 8555 §9.7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.6
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    /// New accounts must agree to these terms when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Issuer domains to put in CAA records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,

    /// External account binding is required to register. Not supported by this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}

impl DirectoryMeta {
    pub fn external_account_required(&self) -> bool {
        self.external_account_required.unwrap_or(false)
    }
}

impl Directory {
    /// URL identifying the current terms of service, if the server publishes one.
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }

    /// Returns true if the server requires external account binding for new accounts.
    pub fn external_account_required(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(DirectoryMeta::external_account_required)
    }
}
