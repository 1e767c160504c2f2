use std::{collections::HashSet, sync::Arc};

use zeroize::Zeroizing;

use crate::{
    api,
    dir::Directory,
    error::Result,
    order::{Orchestrator, Order},
    solver::Solvers,
    trans::Transport,
};

mod acme_key;
pub(crate) mod revoke;

pub use self::{acme_key::AccountKey, revoke::RevocationReason};

#[derive(Debug)]
pub(crate) struct AccountInner {
    pub(crate) transport: Transport,
    pub(crate) api_account: api::Account,
    pub(crate) directory: Directory,
    pub(crate) url: String,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] or found again with
/// [`Directory::lookup_account()`]. The account is identified by the URL the server assigned to
/// it, which is used as key ID for every request signed after that.
///
/// Cloning is cheap; clones share the client's nonce pool and connections.
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        directory: Directory,
    ) -> Self {
        let url = transport.key_id().unwrap_or_default().to_owned();

        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                directory,
                url,
            }),
        }
    }

    /// The account URL assigned by the server.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The key this account is bound to.
    pub fn account_key(&self) -> &AccountKey {
        self.inner.transport.account_key()
    }

    /// Private key for this account.
    ///
    /// The key is an elliptic curve private key.
    pub fn acme_private_key_pem(&self) -> eyre::Result<Zeroizing<String>> {
        self.account_key().to_pem()
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// Identifiers are lowercased and duplicates dropped, keeping the first occurrence. The first
    /// identifier is used as the certificate's `CN` by [`create_csr`](crate::create_csr).
    ///
    /// This library doesn't constrain the number of identifiers, but it is limited by the ACME API
    /// provider. Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order<I, S>(&self, identifiers: I) -> Result<Order>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dedup = HashSet::new();
        let identifiers = identifiers
            .into_iter()
            .map(|domain| domain.as_ref().to_ascii_lowercase())
            .filter(|domain| dedup.insert(domain.clone()))
            .map(|domain| api::Identifier::dns(&domain))
            .collect::<Vec<_>>();

        if identifiers.is_empty() {
            return Err(eyre::eyre!("an order needs at least one identifier").into());
        }

        let order = api::Order::from_identifiers(identifiers);

        let new_order_url = self.inner.directory.new_order_url();

        let res = self.inner.transport.post(&new_order_url, &order).await?;
        let order_url = res.location()?;
        let api_order = res.json::<api::Order>()?;

        let mut order = Order::new(&self.inner, order, order_url);
        order.api_order.overwrite(api_order)?;

        log::info!("Created order {} for {:?}", order.url(), order.domains());
        Ok(order)
    }

    /// Loads an existing order by its URL, e.g. to resume it after a restart.
    pub async fn order(&self, url: &str) -> Result<Order> {
        let api_order = self
            .inner
            .transport
            .post_as_get(url)
            .await?
            .json::<api::Order>()?;

        Ok(Order::new(&self.inner, api_order, url.to_owned()))
    }

    /// Creates an [`Orchestrator`] that proves control of order identifiers with `solvers`.
    pub fn orchestrator(&self, solvers: Solvers) -> Orchestrator {
        Orchestrator::new(self.clone(), solvers)
    }

    /// Revoke a certificate for the reason given.
    ///
    /// `certificate_der` is the DER encoding of the end-entity certificate. The request is
    /// authorized by this account; see [`Directory::revoke_certificate_with_key`] to use the
    /// certificate's key instead.
    pub async fn revoke_certificate(
        &self,
        certificate_der: &[u8],
        reason: RevocationReason,
    ) -> Result<()> {
        let revocation = revoke::revocation(certificate_der, reason);

        let url = self.inner.directory.revoke_cert_url();
        self.inner.transport.post(&url, &revocation).await?;

        log::info!("Revoked certificate");
        Ok(())
    }

    /// Deactivates the account. The server refuses any further request signed by it.
    ///
    /// See [RFC 8555 §7.3.6](https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.6).
    pub async fn deactivate(&self) -> Result<api::Account> {
        let res = self
            .inner
            .transport
            .post(&self.inner.url, &api::Account::deactivation())
            .await?;

        log::info!("Deactivated account {}", self.inner.url);
        res.json()
    }

    /// Returns a reference to the account's API object.
    ///
    /// Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }

    pub(crate) fn inner(&self) -> &Arc<AccountInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use crate::{test::with_directory_server, AccountKey, Directory, DirectoryUrl, Error};

    async fn account(dir_url: &str) -> crate::Account {
        let dir = Directory::fetch(DirectoryUrl::Other(dir_url)).await.unwrap();
        dir.register_account(
            AccountKey::generate(),
            Some(vec!["mailto:foo@bar.com".to_owned()]),
            true,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_order() {
        let server = with_directory_server();
        let acc = account(&server.dir_url).await;

        let order = acc
            .new_order(["acme-test.example.com", "www.example.com", "ACME-test.example.com"])
            .await
            .unwrap();

        assert_eq!(order.domains(), ["acme-test.example.com", "www.example.com"]);
        assert_eq!(order.authorization_urls().len(), 2);
    }

    #[tokio::test]
    async fn empty_order_is_rejected_locally() {
        let server = with_directory_server();
        let acc = account(&server.dir_url).await;

        let err = acc.new_order(Vec::<String>::new()).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(server.count_posts("/acme/new-order"), 0);
    }

    #[tokio::test]
    async fn resume_order_by_url() {
        let server = with_directory_server();
        let acc = account(&server.dir_url).await;

        let order = acc.new_order(["acme-test.example.com"]).await.unwrap();
        let resumed = acc.order(order.url()).await.unwrap();

        assert_eq!(resumed.url(), order.url());
        assert_eq!(resumed.domains(), order.domains());
    }

    #[tokio::test]
    async fn deactivate_account() {
        let server = with_directory_server();
        let acc = account(&server.dir_url).await;

        let api_account = acc.deactivate().await.unwrap();
        assert!(api_account.is_status_deactivated());

        // requests signed by a deactivated account are refused
        let err = acc.new_order(["acme-test.example.com"]).await.unwrap_err();
        let problem = err.problem().unwrap();
        assert_eq!(problem._type, "urn:ietf:params:acme:error:unauthorized");
    }
}
