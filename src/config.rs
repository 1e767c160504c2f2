//! Tunables for the client and for order processing.
//!
//! Everything has a [`Default`] suitable for Let's Encrypt. Mind their [rate limits] before
//! tightening the polling intervals.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

use std::time::Duration;

use crate::solver::ChallengeType;

/// Maximum size of a response body we will read (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// HTTP level settings of a client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect timeout for every request.
    pub connect_timeout: Duration,

    /// Total timeout for a single request/response exchange.
    pub request_timeout: Duration,

    /// Response bodies above this size are rejected with [`Error::SizeLimit`].
    ///
    /// [`Error::SizeLimit`]: crate::Error::SizeLimit
    pub max_body_size: usize,

    /// How many unused nonces the pool keeps around.
    pub nonce_pool_capacity: usize,

    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            nonce_pool_capacity: 10,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Exponential backoff for polling server-driven state transitions.
///
/// The delay starts at `initial` and doubles after each attempt up to `max`. A `Retry-After`
/// header sent by the server replaces the computed delay. Polling gives up with
/// [`Error::Timeout`] after `max_attempts` polls or once `max_wait` has elapsed, whichever comes
/// first.
///
/// [`Error::Timeout`]: crate::Error::Timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub max_wait: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            max_attempts: 30,
            max_wait: Duration::from_secs(5 * 60),
        }
    }
}

impl Backoff {
    /// Delay before poll number `attempt + 1`, where `attempt` starts at 1.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after;
        }

        let shift = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1 << shift)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Self-check of DNS propagation before the server is asked to validate a `dns-01` challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationCheck {
    pub enabled: bool,

    /// Pause between two lookups against the authoritative servers.
    pub interval: Duration,

    /// Give up (and fail the identifier) after this long.
    pub timeout: Duration,
}

impl Default for PropagationCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Which certificate chain to download when the server offers alternates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainPreference {
    /// The chain the certificate URL points to.
    #[default]
    Default,

    /// The n-th `Link: rel="alternate"` entry, counting from 1.
    ///
    /// `Index(0)` is the default chain.
    Index(usize),
}

/// How an order is driven through authorization and finalization.
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    /// Upper bound of identifiers processed at the same time.
    pub concurrency: usize,

    /// Challenge types in order of preference.
    pub challenge_priority: Vec<ChallengeType>,

    pub backoff: Backoff,

    pub propagation: PropagationCheck,

    pub chain: ChainPreference,

    /// Deactivate still pending authorizations of a failed order, so they don't count towards
    /// the server's pending authorization limits.
    pub deactivate_on_failure: bool,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            concurrency: 4,
            challenge_priority: vec![
                ChallengeType::Dns01,
                ChallengeType::Http01,
                ChallengeType::TlsAlpn01,
            ],
            backoff: Backoff::default(),
            propagation: PropagationCheck::default(),
            chain: ChainPreference::Default,
            deactivate_on_failure: false,
        }
    }
}

impl OrderPolicy {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_challenge_priority(mut self, priority: impl Into<Vec<ChallengeType>>) -> Self {
        self.challenge_priority = priority.into();
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_propagation(mut self, propagation: PropagationCheck) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_chain(mut self, chain: ChainPreference) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_deactivate_on_failure(mut self, deactivate: bool) -> Self {
        self.deactivate_on_failure = deactivate;
        self
    }
}
