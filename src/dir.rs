use std::sync::Arc;

use eyre::eyre;
use parking_lot::RwLock;
use reqwest::StatusCode;

use crate::{
    acc::{revoke, AccountKey},
    api,
    config::ClientConfig,
    error::{Error, Result},
    nonce::NoncePool,
    req::HttpClient,
    trans::Transport,
    Account, RevocationReason,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DirectoryInner {
    url: String,
    http: HttpClient,
    nonce_pool: Arc<NoncePool>,
    api_directory: RwLock<Arc<api::Directory>>,
}

/// Entry point for accessing an ACME API.
///
/// A `Directory` is one client instance: it owns the cached directory document, the nonce pool
/// and the HTTP connection pool. Clones share all three. Everything is torn down when the last
/// clone (including the [`Account`]s created from it) is dropped.
#[derive(Debug, Clone)]
pub struct Directory {
    inner: Arc<DirectoryInner>,
}

impl Directory {
    /// Fetches the directory document with the default [`ClientConfig`].
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        Self::fetch_with_config(url, ClientConfig::default()).await
    }

    pub async fn fetch_with_config(
        url: DirectoryUrl<'_>,
        config: ClientConfig,
    ) -> Result<Directory> {
        let http = HttpClient::new(&config)?;
        let url = url.to_url().to_owned();

        let api_directory = fetch_api_directory(&http, &url).await?;
        let nonce_pool = Arc::new(NoncePool::new(
            http.clone(),
            &api_directory.new_nonce,
            config.nonce_pool_capacity,
        ));

        Ok(Directory {
            inner: Arc::new(DirectoryInner {
                url,
                http,
                nonce_pool,
                api_directory: RwLock::new(Arc::new(api_directory)),
            }),
        })
    }

    /// Fetches the directory document again, e.g. after the server signaled that its endpoints
    /// moved. Otherwise the document is cached for the lifetime of the client.
    pub async fn refresh(&self) -> Result<()> {
        let api_directory = fetch_api_directory(&self.inner.http, &self.inner.url).await?;
        self.inner.nonce_pool.set_nonce_url(&api_directory.new_nonce);
        *self.inner.api_directory.write() = Arc::new(api_directory);
        Ok(())
    }

    /// Registers a new account bound to `key`.
    ///
    /// When the key already has an account, the server returns that account instead of
    /// creating another one.
    ///
    /// If the server publishes terms of service, `terms_agreed` must be true.
    pub async fn register_account(
        &self,
        key: AccountKey,
        contact: Option<Vec<String>>,
        terms_agreed: bool,
    ) -> Result<Account> {
        let api_directory = self.api_directory();

        if api_directory.external_account_required() {
            return Err(eyre!("the ACME server requires external account binding").into());
        }

        if !terms_agreed {
            if let Some(terms) = api_directory.terms_of_service() {
                return Err(eyre!("the terms of service at {terms} must be agreed to").into());
            }
        }

        // TODO: ensure email contains no hfields or more than one addr-spec in the to component
        // see https://datatracker.ietf.org/doc/html/rfc8555#section-7.3
        let acc = api::Account::registration(contact, terms_agreed);

        let mut transport = self.transport(key);
        let res = transport.post_jwk(&api_directory.new_account, &acc).await?;

        let kid = res.location()?;
        if res.status() == StatusCode::CREATED {
            log::info!("Registered account {kid}");
        } else {
            log::info!("Key is already registered as account {kid}");
        }
        let api_account = res.json::<api::Account>()?;

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(transport, api_account, self.clone()))
    }

    /// Looks up the account bound to `key` without creating one.
    ///
    /// Returns `None` if the server knows no account for the key.
    pub async fn lookup_account(&self, key: AccountKey) -> Result<Option<Account>> {
        let api_directory = self.api_directory();
        let acc = api::Account::only_return_existing();

        let mut transport = self.transport(key);
        let res = match transport.post_jwk(&api_directory.new_account, &acc).await {
            Ok(res) => res,
            Err(Error::Protocol(problem)) if problem.is_account_does_not_exist() => {
                log::debug!("No account exists for key");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let kid = res.location()?;
        log::debug!("Key ID is: {kid}");
        let api_account = res.json::<api::Account>()?;

        transport.set_key_id(kid);

        Ok(Some(Account::new(transport, api_account, self.clone())))
    }

    /// Revokes a certificate, proving control with the certificate's own private key rather than
    /// an account.
    ///
    /// `certificate_der` is the DER encoding of the end-entity certificate.
    pub async fn revoke_certificate_with_key(
        &self,
        certificate_der: &[u8],
        certificate_key: &p256::ecdsa::SigningKey,
        reason: RevocationReason,
    ) -> Result<()> {
        let revocation = revoke::revocation(certificate_der, reason);
        let url = self.api_directory().revoke_cert.clone();

        // any key works for the transport, it is not used to sign
        let transport = self.transport(AccountKey::from_signing_key(certificate_key.clone()));
        transport
            .post_with_key(&url, certificate_key, &revocation)
            .await?;

        log::info!("Revoked certificate using its own key");
        Ok(())
    }

    /// Returns the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> Arc<api::Directory> {
        Arc::clone(&self.inner.api_directory.read())
    }

    pub fn new_account_url(&self) -> String {
        self.api_directory().new_account.clone()
    }

    pub fn new_order_url(&self) -> String {
        self.api_directory().new_order.clone()
    }

    pub fn new_nonce_url(&self) -> String {
        self.api_directory().new_nonce.clone()
    }

    pub fn revoke_cert_url(&self) -> String {
        self.api_directory().revoke_cert.clone()
    }

    /// URL of the current terms of service, if the server has any.
    pub fn terms_of_service(&self) -> Option<String> {
        self.api_directory().terms_of_service().map(ToOwned::to_owned)
    }

    pub fn website(&self) -> Option<String> {
        self.api_directory().meta.as_ref()?.website.clone()
    }

    /// Domains the server recognizes in CAA records as referring to itself.
    pub fn caa_identities(&self) -> Vec<String> {
        self.api_directory()
            .meta
            .as_ref()
            .and_then(|meta| meta.caa_identities.clone())
            .unwrap_or_default()
    }

    pub fn external_account_required(&self) -> bool {
        self.api_directory().external_account_required()
    }

    pub(crate) fn transport(&self, key: AccountKey) -> Transport {
        Transport::new(
            self.inner.http.clone(),
            Arc::clone(&self.inner.nonce_pool),
            key,
        )
    }
}

async fn fetch_api_directory(http: &HttpClient, url: &str) -> Result<api::Directory> {
    log::debug!("Fetching directory {url}");
    http.get(url).await?.into_result()?.json()
}
