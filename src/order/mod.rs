//! Order life cycle.
//!
//! An [`Order`] is one certificate request. It moves through
//! `Created → AuthorizationsPending → Finalizing → Valid | Failed` (see [`OrderState`]), driven
//! by an [`Orchestrator`]:
//!
//! 1. [`Orchestrator::authorize`] proves control of every identifier, several at a time, using
//!    the registered [`ChallengeSolver`](crate::ChallengeSolver)s.
//! 2. [`Orchestrator::finalize`] submits the CSR and waits for issuance.
//! 3. The certificate chain is downloaded into a [`CertificateBundle`].
//!
//! [`Orchestrator::obtain_certificate`] does all three.
//!
//! A failing identifier never stops its siblings. Once all of them have finished, the order
//! fails with an [`AuthorizationReport`] telling which identifiers succeeded and why the others
//! did not.

use std::{fmt, sync::Arc, time::Duration};

use futures::stream::{self, StreamExt as _};

use crate::{
    acc::AccountInner,
    api::{self, AuthorizationStatus, OrderStatus},
    cancel::CancelToken,
    cert::{self, CertificateBundle},
    config::OrderPolicy,
    dns::{AuthoritativeLookup, PropagationChecker},
    error::{Error, Result},
    solver::{ChallengeType, Solvers},
    Account,
};

mod auth;
pub(crate) mod poll;

use self::poll::{poll_until, Poll};

/// Where an order stands from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Submitted; identifiers not worked on yet.
    Created,

    /// Proving control of identifiers.
    AuthorizationsPending,

    /// CSR submitted; waiting for the certificate.
    Finalizing,

    /// The certificate was issued.
    Valid,

    /// An identifier could not be authorized, or the server gave up on the order.
    Failed,
}

/// An order with the ACME API provider, created by [`Account::new_order`].
///
/// The identifier set is fixed at creation.
#[derive(Debug)]
pub struct Order {
    inner: Arc<AccountInner>,
    pub(crate) api_order: api::Order,
    url: String,
    state: OrderState,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: api::Order, url: String) -> Self {
        let state = match api_order.status {
            Some(OrderStatus::Processing) => OrderState::Finalizing,
            Some(OrderStatus::Valid) => OrderState::Valid,
            Some(OrderStatus::Invalid) => OrderState::Failed,
            _ => OrderState::Created,
        };

        Order {
            inner: Arc::clone(inner),
            api_order,
            url,
            state,
        }
    }

    /// The order URL, e.g. to resume it later with [`Account::order`].
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The identifiers of this order, in the order they were requested.
    pub fn domains(&self) -> Vec<&str> {
        self.api_order.domains()
    }

    pub fn authorization_urls(&self) -> &[String] {
        self.api_order.authorizations.as_deref().unwrap_or_default()
    }

    /// Status last reported by the server.
    pub fn status(&self) -> Option<OrderStatus> {
        self.api_order.status
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Fetches the order from the server again (POST-as-GET).
    pub async fn refresh(&mut self) -> Result<()> {
        let (api_order, _) = fetch_order(&self.inner, &self.url).await?;
        self.api_order.overwrite(api_order)?;
        Ok(())
    }

    /// Returns a reference to the order's API object.
    ///
    /// Useful for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.api_order
    }

    /// Stores a freshly fetched order object, or marks the order failed.
    fn update(&mut self, res: Result<api::Order>) -> Result<()> {
        match res {
            Ok(api_order) => Ok(self.api_order.overwrite(api_order)?),
            Err(err) => {
                self.state = OrderState::Failed;
                Err(err)
            }
        }
    }
}

async fn fetch_order(inner: &AccountInner, url: &str) -> Result<(api::Order, Option<Duration>)> {
    let res = inner.transport.post_as_get(url).await?;
    Ok((res.json()?, res.retry_after()))
}

/// Outcome for one identifier of an order.
#[derive(Debug)]
pub struct IdentifierOutcome {
    /// The identifier, or the authorization URL if the authorization could not be fetched.
    pub identifier: String,

    pub authorization_url: String,

    /// The challenge type that was attempted, if any.
    pub challenge: Option<ChallengeType>,

    pub result: Result<AuthorizationStatus>,

    /// Set when removing the proof failed. Never fails the identifier.
    pub cleanup_error: Option<String>,
}

impl IdentifierOutcome {
    fn new(authorization_url: &str) -> Self {
        Self {
            identifier: authorization_url.to_owned(),
            authorization_url: authorization_url.to_owned(),
            challenge: None,
            result: Err(Error::Cancelled),
            cleanup_error: None,
        }
    }

    fn fail(mut self, err: Error) -> Self {
        self.result = Err(err);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-identifier outcomes of [`Orchestrator::authorize`], in authorization order.
#[derive(Debug, Default)]
pub struct AuthorizationReport {
    pub outcomes: Vec<IdentifierOutcome>,
}

impl AuthorizationReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(IdentifierOutcome::is_success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &IdentifierOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &IdentifierOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

impl fmt::Display for AuthorizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed().count();
        write!(
            f,
            "{failed} of {} identifiers failed authorization",
            self.outcomes.len()
        )?;

        for outcome in self.failed() {
            if let Err(err) = &outcome.result {
                write!(f, "; {}: {err}", outcome.identifier)?;
            }
        }

        Ok(())
    }
}

/// Drives orders of one account through authorization, finalization and download.
///
/// Created with [`Account::orchestrator`].
///
/// ```no_run
/// use acme::{ChallengeType, Directory, DirectoryUrl, AccountKey, Solvers};
/// # use acme::ChallengeSolver;
/// # struct Webroot;
/// # #[async_trait::async_trait]
/// # impl ChallengeSolver for Webroot {
/// #     async fn present(&self, _: &str, _: &str, _: &str) -> eyre::Result<()> { Ok(()) }
/// #     async fn cleanup(&self, _: &str, _: &str, _: &str) -> eyre::Result<()> { Ok(()) }
/// # }
///
/// # async fn run() -> acme::Result<()> {
/// let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;
/// let account = dir.register_account(AccountKey::generate(), None, true).await?;
///
/// let order = account.new_order(["example.com"]).await?;
///
/// let cert_key = acme::create_p256_key();
/// let csr = acme::create_csr(&cert_key, &order.domains())?;
///
/// let bundle = account
///     .orchestrator(Solvers::new().with(ChallengeType::Http01, Webroot))
///     .obtain_certificate(order, &csr)
///     .await?;
///
/// println!("{}", bundle.to_pem()?);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    account: Account,
    solvers: Solvers,
    policy: OrderPolicy,
    propagation: Option<Arc<PropagationChecker>>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub(crate) fn new(account: Account, solvers: Solvers) -> Self {
        Self {
            account,
            solvers,
            policy: OrderPolicy::default(),
            propagation: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: OrderPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables the `dns-01` propagation self-check, querying through `lookup`.
    ///
    /// Without a lookup, `dns-01` challenges are signaled right after the record is presented.
    pub fn with_dns_lookup(mut self, lookup: Arc<dyn AuthoritativeLookup>) -> Self {
        self.propagation = Some(Arc::new(PropagationChecker::new(lookup)));
        self
    }

    /// Makes the orchestrator stop when `cancel` is cancelled.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// Proves control of every identifier of `order`.
    ///
    /// Up to `policy.concurrency` identifiers are worked on at once. Authorizations that are
    /// already valid are skipped.
    ///
    /// Fails with [`Error::Authorizations`] if any identifier failed, once all others finished.
    pub async fn authorize(&self, order: &mut Order) -> Result<AuthorizationReport> {
        order.state = OrderState::AuthorizationsPending;

        let urls = order.authorization_urls().to_vec();
        log::info!(
            "Authorizing {} identifiers of order {}",
            urls.len(),
            order.url
        );

        let mut outcomes = stream::iter(urls.iter().enumerate())
            .map(|(idx, url)| async move { (idx, self.authorize_identifier(url).await) })
            .buffer_unordered(self.policy.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let report = AuthorizationReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        if self.cancel.is_cancelled() {
            order.state = OrderState::Failed;
            return Err(Error::Cancelled);
        }

        if !report.is_success() {
            order.state = OrderState::Failed;

            if self.policy.deactivate_on_failure {
                self.deactivate_pending(&report).await;
            }

            return Err(Error::Authorizations(report));
        }

        Ok(report)
    }

    async fn deactivate_pending(&self, report: &AuthorizationReport) {
        // invalid authorizations are final already
        let pending = report
            .failed()
            .filter(|o| !matches!(o.result, Err(Error::Validation { .. })))
            .map(|o| o.authorization_url.as_str());

        for url in pending {
            self.deactivate_authorization(url).await;
        }
    }

    /// Submits `csr_der` and waits until the certificate is issued.
    ///
    /// The CSR must name exactly the identifiers of the order. Resumed orders that are already
    /// processing or valid are not submitted again.
    pub async fn finalize(&self, order: &mut Order, csr_der: &[u8]) -> Result<()> {
        let expected = order.domains().into_iter().map(str::to_owned).collect::<Vec<_>>();
        cert::check_csr_identifiers(csr_der, &expected)?;

        let inner = Arc::clone(&order.inner);
        let url = order.url.clone();

        // authorizations just turned valid, the order may lag behind
        let res = self
            .poll_order(&inner, &url, "order to become ready", |status| {
                status != OrderStatus::Pending
            })
            .await;
        order.update(res)?;

        if order.api_order.is_status(OrderStatus::Ready) {
            log::info!("Finalizing order {url}");
            let finalize = api::Finalize::from_der(csr_der);
            let res = self
                .cancel
                .run(inner.transport.post(&order.api_order.finalize, &finalize))
                .await
                .and_then(|res| res);

            if let Err(err) = res {
                order.state = OrderState::Failed;
                return Err(err);
            }
        }
        order.state = OrderState::Finalizing;

        let res = self
            .poll_order(&inner, &url, "certificate issuance", |status| {
                !matches!(status, OrderStatus::Ready | OrderStatus::Processing)
            })
            .await;
        order.update(res)?;

        if !order.api_order.is_status(OrderStatus::Valid) {
            order.state = OrderState::Failed;
            return Err(Error::Order {
                url,
                status: order
                    .api_order
                    .status
                    .map_or("unknown", OrderStatus::as_str)
                    .to_owned(),
                problem: order.api_order.error.clone(),
            });
        }

        log::info!("Order {url} is valid");
        order.state = OrderState::Valid;
        Ok(())
    }

    /// Polls the order until `done` accepts its status, or it turns invalid.
    async fn poll_order(
        &self,
        inner: &AccountInner,
        url: &str,
        what: &str,
        done: impl Fn(OrderStatus) -> bool,
    ) -> Result<api::Order> {
        let done = &done;

        poll_until(&self.policy.backoff, &self.cancel, what, move || async move {
            let (api_order, retry_after) = fetch_order(inner, url).await?;

            match api_order.status {
                Some(OrderStatus::Invalid) => Ok(Poll::Ready(api_order)),
                Some(status) if done(status) => Ok(Poll::Ready(api_order)),
                _ => Ok(Poll::Pending { retry_after }),
            }
        })
        .await
    }

    /// Authorizes, finalizes and downloads the certificate of `order`.
    ///
    /// `csr_der` is the DER encoding of a CSR for exactly the order's identifiers, see
    /// [`create_csr`](crate::create_csr). The chain is picked according to `policy.chain`.
    pub async fn obtain_certificate(
        &self,
        mut order: Order,
        csr_der: &[u8],
    ) -> Result<CertificateBundle> {
        if matches!(order.status(), None | Some(OrderStatus::Pending)) {
            self.authorize(&mut order).await?;
        }

        self.finalize(&mut order, csr_der).await?;

        let cert_url = order.api_order.certificate.clone().ok_or_else(|| {
            eyre::eyre!("order {} is valid but has no certificate URL", order.url)
        })?;

        self.cancel
            .run(cert::download_chain(
                &order.inner.transport,
                &cert_url,
                self.policy.chain,
            ))
            .await?
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("account", &self.account.url())
            .field("solvers", &self.solvers)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
