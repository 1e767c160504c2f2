use eyre::WrapErr as _;
use p256::ecdsa::SigningKey;
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use zeroize::Zeroizing;

use crate::jws::Jwk;

/// The key an ACME account is bound to.
///
/// This library uses elliptic curve P-256 (`ES256`) for accessing the account. The advantages of
/// using elliptic curve cryptography are that the signed requests against the ACME API are small
/// and that the public key can be derived from the private key.
#[derive(Clone)]
pub struct AccountKey {
    signing_key: SigningKey,
}

impl AccountKey {
    /// Generates a fresh random key.
    pub fn generate() -> AccountKey {
        Self::from_signing_key(crate::create_p256_key())
    }

    /// Reads a PKCS #8 PEM encoded P-256 private key.
    pub fn from_pem(pem: &str) -> eyre::Result<AccountKey> {
        let signing_key = SigningKey::from_pkcs8_pem(pem).wrap_err("Failed to read PEM")?;
        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> AccountKey {
        AccountKey { signing_key }
    }

    /// The private key as PKCS #8 PEM.
    pub fn to_pem(&self) -> eyre::Result<Zeroizing<String>> {
        self.signing_key
            .to_pkcs8_pem(pem::LineEnding::LF)
            .wrap_err("private_key_to_pem")
    }

    /// JWK thumbprint of the public key, used in key authorizations.
    pub fn thumbprint(&self) -> eyre::Result<String> {
        Jwk::try_from(&self.signing_key)?.thumbprint()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint().ok())
            .finish_non_exhaustive()
    }
}
