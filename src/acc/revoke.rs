use crate::api;

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}

/// Builds the revokeCert payload. See [RFC 8555 §7.6].
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
pub(crate) fn revocation(certificate_der: &[u8], reason: RevocationReason) -> api::Revocation {
    let reason = match reason {
        // > the reason code CRL entry extension SHOULD be absent instead of
        // > using the unspecified (0) reasonCode value
        // see <https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1>
        RevocationReason::Unspecified => None,

        reason => Some(reason as u8),
    };

    api::Revocation::from_der(certificate_der, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::with_directory_server, AccountKey, Directory, DirectoryUrl, Error};

    #[test]
    fn unspecified_reason_is_omitted() {
        let payload = revocation(b"\x30\x03", RevocationReason::Unspecified);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"certificate":"MAM"}"#
        );

        let payload = revocation(b"\x30\x03", RevocationReason::KeyCompromise);
        assert_eq!(payload.reason, Some(1));
    }

    #[tokio::test]
    async fn revoke_with_account_key() {
        let server = with_directory_server();
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url))
            .await
            .unwrap();
        let acc = dir
            .register_account(AccountKey::generate(), None, true)
            .await
            .unwrap();

        let cert_der = server.leaf_der();

        acc.revoke_certificate(&cert_der, RevocationReason::Superseded)
            .await
            .unwrap();
        assert_eq!(server.revocations(), [(true, Some(4))]);

        let err = acc
            .revoke_certificate(&cert_der, RevocationReason::Superseded)
            .await
            .unwrap_err();
        match err {
            Error::Protocol(problem) => assert!(problem.is_already_revoked()),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn revoke_with_certificate_key() {
        let server = with_directory_server();
        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url))
            .await
            .unwrap();

        let cert_key = crate::create_p256_key();
        dir.revoke_certificate_with_key(
            &server.leaf_der(),
            &cert_key,
            RevocationReason::KeyCompromise,
        )
        .await
        .unwrap();

        // signed with an embedded key, no account involved
        assert_eq!(server.revocations(), [(false, Some(1))]);
        assert_eq!(server.accounts_created(), 0);
    }
}
