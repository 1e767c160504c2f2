use std::sync::Arc;

use eyre::eyre;
use p256::ecdsa::SigningKey;
use serde::Serialize;

use crate::{
    acc::AccountKey,
    error::{Error, Result},
    jws::{self, JwsIdentity},
    nonce::NoncePool,
    req::{HttpClient, Response},
};

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `post_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `post()` and `post_as_get()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    http: HttpClient,
    nonce_pool: Arc<NoncePool>,
    account_key: AccountKey,

    /// Set once we contacted the ACME API to figure out the account URL.
    key_id: Option<String>,
}

impl Transport {
    pub(crate) fn new(
        http: HttpClient,
        nonce_pool: Arc<NoncePool>,
        account_key: AccountKey,
    ) -> Self {
        Transport {
            http,
            nonce_pool,
            account_key,
            key_id: None,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }

    pub(crate) fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The key used in the transport
    pub(crate) fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// Signed POST embedding the account's public key.
    ///
    /// Only needed for newAccount requests.
    pub(crate) async fn post_jwk<T>(&self, url: &str, payload: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(payload)?;
        self.do_call(
            url,
            self.account_key.signing_key(),
            JwsIdentity::Jwk,
            Some(&payload),
        )
        .await
    }

    /// Signed POST embedding the public key of some other key.
    ///
    /// Used to revoke a certificate with the certificate's own key.
    pub(crate) async fn post_with_key<T>(
        &self,
        url: &str,
        key: &SigningKey,
        payload: &T,
    ) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(payload)?;
        self.do_call(url, key, JwsIdentity::Jwk, Some(&payload))
            .await
    }

    /// Signed POST on behalf of the account.
    pub(crate) async fn post<T>(&self, url: &str, payload: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(payload)?;
        let kid = self.require_key_id()?;
        self.do_call(
            url,
            self.account_key.signing_key(),
            JwsIdentity::Kid(kid),
            Some(&payload),
        )
        .await
    }

    /// Signed request with an empty payload, fetching the resource at `url`.
    ///
    /// See [RFC 8555 §6.3](https://datatracker.ietf.org/doc/html/rfc8555#section-6.3).
    pub(crate) async fn post_as_get(&self, url: &str) -> Result<Response> {
        let kid = self.require_key_id()?;
        self.do_call(
            url,
            self.account_key.signing_key(),
            JwsIdentity::Kid(kid),
            None,
        )
        .await
    }

    fn require_key_id(&self) -> Result<&str> {
        self.key_id
            .as_deref()
            .ok_or_else(|| eyre!("account URL (key ID) is not known yet").into())
    }

    async fn do_call(
        &self,
        url: &str,
        key: &SigningKey,
        identity: JwsIdentity<'_>,
        payload: Option<&[u8]>,
    ) -> Result<Response> {
        // A nonce may be rejected by the server at any time (e.g. after it rotated its nonce
        // keys). The request is re-signed with a fresh nonce once; a second rejection is final.
        let mut retried = false;

        loop {
            // Either get a new nonce, or reuse one from a previous response.
            let nonce = self.nonce_pool.acquire().await?;

            // Sign the body.
            let body = jws::sign(key, identity, url, nonce, payload)?;

            log::debug!("Call endpoint: {url}");

            // Post it to the URL
            let res = self.http.post_jose(url, body).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract(res.headers());

            // Turn errors into Problem.
            let result = self.http.read(res).await?.into_result();

            match result {
                Err(Error::Protocol(problem)) if problem.is_bad_nonce() && !retried => {
                    log::debug!("Retrying on bad nonce");
                    retried = true;
                }
                result => return result,
            }
        }
    }
}
