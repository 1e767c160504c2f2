//! Request bodies that carry DER data.
//!
//! ACME embeds DER objects as unpadded base64url, without PEM armor.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Body posted to an order's `finalize` URL. See [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    pub csr: String,
}

impl Finalize {
    pub(crate) fn from_der(csr_der: &[u8]) -> Self {
        Self {
            csr: BASE64_URL_SAFE_NO_PAD.encode(csr_der),
        }
    }
}

/// Body posted to `revokeCert`. See [RFC 8555 §7.6].
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// The end-entity certificate.
    pub certificate: String,

    /// A reasonCode from [RFC 5280 §5.3.1]. Absent means unspecified.
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

impl Revocation {
    pub(crate) fn from_der(certificate_der: &[u8], reason: Option<u8>) -> Self {
        Self {
            certificate: BASE64_URL_SAFE_NO_PAD.encode(certificate_der),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn der_is_unpadded_base64url() {
        // 0xfb 0xff encodes to "-_8" in base64url
        let finalize = Finalize::from_der(&[0xfb, 0xff]);
        assert_eq!(serde_json::to_string(&finalize).unwrap(), r#"{"csr":"-_8"}"#);

        let revocation = Revocation::from_der(&[0xfb, 0xff], Some(4));
        assert_eq!(
            serde_json::to_string(&revocation).unwrap(),
            r#"{"certificate":"-_8","reason":4}"#
        );
    }
}
