//! Self-check of `dns-01` proofs against the authoritative name servers.
//!
//! Asking the CA to validate before the `TXT` record is visible wastes the authorization: a
//! failed validation is final. Recursive resolvers may cache a negative answer, so the check
//! queries the zone's authoritative servers directly, through an [`AuthoritativeLookup`].

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::{
    cancel::CancelToken,
    config::PropagationCheck,
    error::{Error, Result},
};

/// A DNS zone and the servers authoritative for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone apex, fully qualified (with trailing dot).
    pub apex: String,

    /// Host names or addresses of the authoritative servers.
    pub nameservers: Vec<String>,
}

/// Resolution against authoritative servers, bypassing caching resolvers.
#[async_trait]
pub trait AuthoritativeLookup: Send + Sync {
    /// Finds the zone `fqdn` belongs to (walking up from `fqdn` to the closest `SOA`).
    async fn find_zone(&self, fqdn: &str) -> eyre::Result<Zone>;

    /// `TXT` records at `fqdn`, asked directly from the servers of `zone`.
    async fn txt_records(&self, fqdn: &str, zone: &Zone) -> eyre::Result<Vec<String>>;
}

/// Read-through cache of values that are expensive to look up and rarely change.
///
/// Readers share the lock; a miss performs one lookup without holding the lock and then takes
/// the exclusive lock only to insert. Entries are never invalidated: a stale zone apex just makes
/// a check fail, which the caller retries.
pub(crate) struct ReadThroughCache<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V: Clone> ReadThroughCache<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn get_or_lookup<F, Fut>(&self, key: &str, lookup: F) -> eyre::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = eyre::Result<V>>,
    {
        let cached = self.entries.read().get(key).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = lookup().await?;
        self.entries.write().insert(key.to_owned(), value.clone());
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Name of the `TXT` record holding the `dns-01` proof for `identifier`.
pub fn challenge_record_name(identifier: &str) -> String {
    let domain = identifier.strip_prefix("*.").unwrap_or(identifier);
    let domain = domain.trim_end_matches('.');
    format!("_acme-challenge.{domain}.")
}

/// Polls the authoritative servers until a `dns-01` proof is visible.
pub struct PropagationChecker {
    lookup: Arc<dyn AuthoritativeLookup>,
    zones: ReadThroughCache<Zone>,
}

impl PropagationChecker {
    pub fn new(lookup: Arc<dyn AuthoritativeLookup>) -> Self {
        Self {
            lookup,
            zones: ReadThroughCache::new(),
        }
    }

    /// Zone of `fqdn`, from cache if it was looked up before.
    pub(crate) async fn zone(&self, fqdn: &str) -> eyre::Result<Zone> {
        self.zones
            .get_or_lookup(fqdn, || self.lookup.find_zone(fqdn))
            .await
    }

    /// Waits until `_acme-challenge.<identifier>` carries `expected`.
    ///
    /// Lookup failures count as "not visible yet". Fails with [`Error::Timeout`] once
    /// `check.timeout` has elapsed, also when a single lookup hangs past it.
    pub async fn wait_for_txt(
        &self,
        identifier: &str,
        expected: &str,
        check: &PropagationCheck,
        cancel: &CancelToken,
    ) -> Result<()> {
        let fqdn = challenge_record_name(identifier);
        let start = Instant::now();
        let timed_out = || Error::Timeout {
            operation: format!("propagation of {fqdn}"),
            budget: check.timeout,
        };

        loop {
            let remaining = check.timeout.saturating_sub(start.elapsed());
            let lookup = tokio::time::timeout(remaining, self.has_record(&fqdn, expected));

            match cancel.run(lookup).await? {
                Ok(Ok(true)) => {
                    log::debug!("TXT record at {fqdn} is visible on authoritative servers");
                    return Ok(());
                }
                Ok(Ok(false)) => log::debug!("TXT record at {fqdn} not visible yet"),
                Ok(Err(err)) => log::debug!("Lookup of {fqdn} failed: {err:#}"),
                Err(_) => {
                    log::debug!("Lookup of {fqdn} still running after {:?}", check.timeout);
                    return Err(timed_out());
                }
            }

            if start.elapsed() + check.interval > check.timeout {
                return Err(timed_out());
            }

            cancel.sleep(check.interval).await?;
        }
    }

    async fn has_record(&self, fqdn: &str, expected: &str) -> eyre::Result<bool> {
        let zone = self.zone(fqdn).await?;
        let records = self.lookup.txt_records(fqdn, &zone).await?;
        Ok(records.iter().any(|txt| txt == expected))
    }
}

impl fmt::Debug for PropagationChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationChecker").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::*;

    /// In-memory authoritative view: records become visible after a number of lookups.
    #[derive(Default)]
    pub(crate) struct FakeAuthority {
        pub(crate) records: Mutex<HashMap<String, Vec<String>>>,
        pub(crate) hidden_lookups: AtomicUsize,
        pub(crate) zone_lookups: AtomicUsize,
        pub(crate) txt_lookups: AtomicUsize,
    }

    impl FakeAuthority {
        pub(crate) fn publish(&self, fqdn: &str, value: &str) {
            self.records
                .lock()
                .entry(fqdn.to_owned())
                .or_default()
                .push(value.to_owned());
        }
    }

    #[async_trait]
    impl AuthoritativeLookup for FakeAuthority {
        async fn find_zone(&self, fqdn: &str) -> eyre::Result<Zone> {
            self.zone_lookups.fetch_add(1, Ordering::SeqCst);
            let apex = fqdn.splitn(2, '.').nth(1).unwrap_or(fqdn).to_owned();
            Ok(Zone {
                apex,
                nameservers: vec!["ns1.example.com.".to_owned()],
            })
        }

        async fn txt_records(&self, fqdn: &str, zone: &Zone) -> eyre::Result<Vec<String>> {
            assert!(fqdn.ends_with(&zone.apex));
            self.txt_lookups.fetch_add(1, Ordering::SeqCst);

            let hidden = self.hidden_lookups.load(Ordering::SeqCst);
            if hidden > 0 {
                self.hidden_lookups.store(hidden - 1, Ordering::SeqCst);
                return Ok(vec![]);
            }

            Ok(self.records.lock().get(fqdn).cloned().unwrap_or_default())
        }
    }

    /// Authority whose servers never answer.
    struct Unresponsive;

    #[async_trait]
    impl AuthoritativeLookup for Unresponsive {
        async fn find_zone(&self, fqdn: &str) -> eyre::Result<Zone> {
            Ok(Zone {
                apex: fqdn.to_owned(),
                nameservers: vec!["ns1.example.com.".to_owned()],
            })
        }

        async fn txt_records(&self, _fqdn: &str, _zone: &Zone) -> eyre::Result<Vec<String>> {
            std::future::pending().await
        }
    }

    fn check() -> PropagationCheck {
        PropagationCheck {
            enabled: true,
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(20),
        }
    }

    #[test]
    fn record_names() {
        assert_eq!(
            challenge_record_name("example.com"),
            "_acme-challenge.example.com."
        );
        assert_eq!(
            challenge_record_name("*.example.com"),
            "_acme-challenge.example.com."
        );
        assert_eq!(
            challenge_record_name("example.com."),
            "_acme-challenge.example.com."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_visible() {
        let authority = Arc::new(FakeAuthority::default());
        authority.publish("_acme-challenge.example.com.", "proof");
        authority.hidden_lookups.store(3, Ordering::SeqCst);

        let checker = PropagationChecker::new(authority.clone());
        let start = Instant::now();
        checker
            .wait_for_txt("example.com", "proof", &check(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(authority.txt_lookups.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(6));

        // zone resolved once, then cached
        assert_eq!(authority.zone_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_visible() {
        let authority = Arc::new(FakeAuthority::default());
        authority.publish("_acme-challenge.example.com.", "other-proof");

        let checker = PropagationChecker::new(authority);
        let err = checker
            .wait_for_txt("example.com", "proof", &check(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { budget, .. } if budget == Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_waiting() {
        let checker = PropagationChecker::new(Arc::new(FakeAuthority::default()));
        let cancel = CancelToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                cancel.cancel();
            })
        };

        let err = checker
            .wait_for_txt("example.com", "proof", &check(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_hung_lookup() {
        let checker = PropagationChecker::new(Arc::new(Unresponsive));
        let cancel = CancelToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let res = tokio::time::timeout(
            Duration::from_secs(600),
            checker.wait_for_txt("example.com", "proof", &check(), &cancel),
        )
        .await
        .expect("hung lookup ignored cancellation");

        assert!(matches!(res, Err(Error::Cancelled)));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_lookup_is_bounded_by_timeout() {
        let checker = PropagationChecker::new(Arc::new(Unresponsive));

        let start = Instant::now();
        let res = tokio::time::timeout(
            Duration::from_secs(600),
            checker.wait_for_txt("example.com", "proof", &check(), &CancelToken::new()),
        )
        .await
        .expect("hung lookup ignored the propagation timeout");

        assert!(matches!(
            res,
            Err(Error::Timeout { ref operation, budget })
                if operation == "propagation of _acme-challenge.example.com."
                    && budget == Duration::from_secs(20)
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn cache_reads_through_once() {
        let cache = ReadThroughCache::<String>::new();
        let lookups = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_lookup("example.com.", || async {
                    lookups.fetch_add(1, Ordering::SeqCst);
                    Ok("zone-id-1".to_owned())
                })
                .await
                .unwrap();
            assert_eq!(value, "zone-id-1");
        }

        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn cache_does_not_store_failures() {
        let cache = ReadThroughCache::<String>::new();

        let res = cache
            .get_or_lookup("example.com.", || async { Err(eyre::eyre!("zone not found")) })
            .await;
        assert!(res.is_err());
        assert_eq!(cache.len(), 0);
    }
}
