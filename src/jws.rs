//! Request signing. See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use eyre::eyre;
use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Protected header of every signed request, see [RFC 8555 §6.2].
///
/// Exactly one of `jwk` and `kid` is set: `jwk` for newAccount and for revocation signed by the
/// certificate key, `kid` (the account URL) for everything else.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    /// Always `ES256`.
    pub(crate) alg: String,

    /// Single-use value taken from the nonce pool.
    pub(crate) nonce: String,

    /// Must equal the request URL.
    pub(crate) url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) jwk: Option<Jwk>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

/// Who the server should consider the signer of a request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum JwsIdentity<'a> {
    /// Embed the public key of the signing key (newAccount, revocation by certificate key).
    Jwk,

    /// Refer to an existing account by its URL.
    Kid(&'a str),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct Jwk {
    pub(crate) alg: String,
    pub(crate) crv: String,
    pub(crate) kty: String,
    #[serde(rename = "use")]
    pub(crate) _use: String,
    pub(crate) x: String,
    pub(crate) y: String,
}

impl TryFrom<&SigningKey> for Jwk {
    type Error = eyre::Error;

    fn try_from(key: &SigningKey) -> eyre::Result<Self> {
        let point = key.verifying_key().to_encoded_point(false);

        let x = point.x().ok_or_else(|| eyre!("public key has no x coordinate"))?;
        let y = point.y().ok_or_else(|| eyre!("public key has no y coordinate"))?;

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        })
    }
}

impl Jwk {
    /// JWK thumbprint as defined in [RFC 7638].
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub(crate) fn thumbprint(&self) -> eyre::Result<String> {
        let json = serde_json::to_string(&JwkThumb::from(self))?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(json)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    pub(crate) protected: String,
    pub(crate) payload: String,
    pub(crate) signature: String,
}

/// Signs `payload` for `url` with the single-use `nonce`.
///
/// A `None` payload produces a POST-as-GET body, where the payload is the empty string (not the
/// encoding of an empty JSON value).
pub(crate) fn sign(
    key: &SigningKey,
    identity: JwsIdentity<'_>,
    url: &str,
    nonce: String,
    payload: Option<&[u8]>,
) -> eyre::Result<String> {
    let protected = match identity {
        JwsIdentity::Jwk => JwsProtectedHeader::new_jwk(Jwk::try_from(key)?, url, nonce),
        JwsIdentity::Kid(kid) => JwsProtectedHeader::new_kid(kid, url, nonce),
    };

    let protected = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
    let payload = payload
        .map(|json| BASE64_URL_SAFE_NO_PAD.encode(json))
        .unwrap_or_default();

    let to_sign = format!("{protected}.{payload}");
    let signature: Signature = key
        .try_sign(to_sign.as_bytes())
        .map_err(|err| eyre!("failed to sign request: {err}"))?;

    let jws = FlattenedJsonJws {
        protected,
        payload,
        signature: BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    };

    Ok(serde_json::to_string(&jws)?)
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::{signature::Verifier as _, VerifyingKey};

    use super::*;

    fn decode_header(jws: &FlattenedJsonJws) -> JwsProtectedHeader {
        let json = BASE64_URL_SAFE_NO_PAD.decode(&jws.protected).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn signed_with_jwk() {
        let key = crate::create_p256_key();
        let body = sign(
            &key,
            JwsIdentity::Jwk,
            "https://example.com/acme/new-acct",
            "nonce-1".to_owned(),
            Some(br#"{"termsOfServiceAgreed":true}"#),
        )
        .unwrap();

        let jws: FlattenedJsonJws = serde_json::from_str(&body).unwrap();
        let header = decode_header(&jws);
        assert_eq!(header.alg, "ES256");
        assert_eq!(header.url, "https://example.com/acme/new-acct");
        assert_eq!(header.nonce, "nonce-1");
        assert_eq!(header.jwk, Some(Jwk::try_from(&key).unwrap()));
        assert!(header.kid.is_none());

        let signature = BASE64_URL_SAFE_NO_PAD.decode(&jws.signature).unwrap();
        let signature = Signature::from_slice(&signature).unwrap();
        let message = format!("{}.{}", jws.protected, jws.payload);
        VerifyingKey::from(&key)
            .verify(message.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn post_as_get_has_empty_payload() {
        let key = crate::create_p256_key();
        let body = sign(
            &key,
            JwsIdentity::Kid("https://example.com/acme/acct/1"),
            "https://example.com/acme/order/1",
            "nonce-2".to_owned(),
            None,
        )
        .unwrap();

        assert!(!body.contains('\n'));

        let jws: FlattenedJsonJws = serde_json::from_str(&body).unwrap();
        assert_eq!(jws.payload, "");

        let header = decode_header(&jws);
        assert_eq!(header.kid.as_deref(), Some("https://example.com/acme/acct/1"));
        assert!(header.jwk.is_none());
    }

    #[test]
    fn thumbprint_uses_required_members_only() {
        // RFC 7638 §3.3: members in lexicographic order, no whitespace.
        let jwk = Jwk {
            alg: "ES256".to_owned(),
            crv: "P-256".to_owned(),
            kty: "EC".to_owned(),
            _use: "sig".to_owned(),
            x: "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI".to_owned(),
            y: "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk".to_owned(),
        };

        let json = serde_json::to_string(&JwkThumb::from(&jwk)).unwrap();
        assert_eq!(
            json,
            r#"{"crv":"P-256","kty":"EC","x":"ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI","y":"h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"}"#
        );

        let expected = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(json));
        assert_eq!(jwk.thumbprint().unwrap(), expected);
    }
}
