//! Challenge types and the proof-provider capability.
//!
//! A [`ChallengeSolver`] publishes and removes a proof: a DNS record, a file served over HTTP, or
//! a certificate answering TLS-ALPN connections. Solvers are registered per [`ChallengeType`] in
//! [`Solvers`]; the orchestrator picks the challenge type per authorization.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use base64::prelude::*;
use sha2::{Digest as _, Sha256};

use crate::acc::AccountKey;

/// The challenge types this client can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    /// `TXT` record at `_acme-challenge.<domain>`. See [RFC 8555 §8.4].
    ///
    /// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
    Dns01,

    /// File at `http://<domain>/.well-known/acme-challenge/<token>`. See [RFC 8555 §8.3].
    ///
    /// [RFC 8555 §8.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.3
    Http01,

    /// Certificate served for ALPN protocol `acme-tls/1`. See [RFC 8737 §3].
    ///
    /// [RFC 8737 §3]: https://datatracker.ietf.org/doc/html/rfc8737#section-3
    TlsAlpn01,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::Http01 => "http-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }

    /// Whether the proof only becomes visible after propagating through a slow external system,
    /// and should be self-checked before the server is asked to validate.
    pub fn needs_propagation_check(self) -> bool {
        matches!(self, ChallengeType::Dns01)
    }

    /// The value a solver must publish for `token`.
    ///
    /// - `dns-01`: base64url SHA-256 digest of the key authorization, the `TXT` record content.
    /// - `http-01`: the key authorization itself, the file content.
    /// - `tls-alpn-01`: the key authorization; the `acmeIdentifier` extension carries its
    ///   SHA-256 digest, see [`tls_alpn_digest`].
    pub fn proof(self, token: &str, key: &AccountKey) -> eyre::Result<String> {
        let key_auth = key_authorization(token, key)?;

        Ok(match self {
            ChallengeType::Dns01 => BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth)),
            ChallengeType::Http01 | ChallengeType::TlsAlpn01 => key_auth,
        })
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> eyre::Result<Self> {
        match s {
            "dns-01" => Ok(ChallengeType::Dns01),
            "http-01" => Ok(ChallengeType::Http01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            other => Err(eyre::eyre!("unknown challenge type: {other}")),
        }
    }
}

/// Key authorization, see [RFC 8555 §8.1].
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub fn key_authorization(token: &str, key: &AccountKey) -> eyre::Result<String> {
    Ok(format!("{token}.{}", key.thumbprint()?))
}

/// Digest to embed in the `acmeIdentifier` extension of a TLS-ALPN validation certificate.
pub fn tls_alpn_digest(key_authorization: &str) -> [u8; 32] {
    Sha256::digest(key_authorization).into()
}

/// Publishes proofs for one challenge type.
///
/// Implementations bind to some external system (a DNS provider API, a web root, a TLS
/// responder). Calls may be slow and may fail; the orchestrator calls them from concurrent
/// identifier workers, so implementations must tolerate that.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Makes `proof` visible for `identifier`.
    async fn present(&self, identifier: &str, token: &str, proof: &str) -> eyre::Result<()>;

    /// Removes what [`present`](Self::present) published.
    ///
    /// Also called when the order is cancelled while `present` is still running, so it must
    /// tolerate a proof that was never (fully) published. Not called when `present` failed.
    async fn cleanup(&self, identifier: &str, token: &str, proof: &str) -> eyre::Result<()>;
}

/// Registered solvers by challenge type.
#[derive(Clone, Default)]
pub struct Solvers {
    solvers: HashMap<ChallengeType, Arc<dyn ChallengeSolver>>,
}

impl Solvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `solver` for `challenge_type`, replacing any previous one.
    pub fn with(
        mut self,
        challenge_type: ChallengeType,
        solver: impl ChallengeSolver + 'static,
    ) -> Self {
        self.solvers.insert(challenge_type, Arc::new(solver));
        self
    }

    pub fn with_arc(
        mut self,
        challenge_type: ChallengeType,
        solver: Arc<dyn ChallengeSolver>,
    ) -> Self {
        self.solvers.insert(challenge_type, solver);
        self
    }

    pub fn get(&self, challenge_type: ChallengeType) -> Option<&Arc<dyn ChallengeSolver>> {
        self.solvers.get(&challenge_type)
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    /// Picks the first type in `priority` that is both offered and has a solver.
    pub(crate) fn select<'a>(
        &self,
        priority: &[ChallengeType],
        offered: impl Iterator<Item = &'a str> + Clone,
    ) -> Option<ChallengeType> {
        priority.iter().copied().find(|ty| {
            self.solvers.contains_key(ty) && offered.clone().any(|offer| offer == ty.as_str())
        })
    }
}

impl fmt::Debug for Solvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.solvers.iter().map(|(ty, solver)| (ty, solver.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ChallengeSolver for Noop {
        async fn present(&self, _: &str, _: &str, _: &str) -> eyre::Result<()> {
            Ok(())
        }

        async fn cleanup(&self, _: &str, _: &str, _: &str) -> eyre::Result<()> {
            Ok(())
        }
    }

    const ALL: [ChallengeType; 3] = [
        ChallengeType::Dns01,
        ChallengeType::Http01,
        ChallengeType::TlsAlpn01,
    ];

    #[test]
    fn select_follows_priority() {
        let solvers = Solvers::new()
            .with(ChallengeType::Http01, Noop)
            .with(ChallengeType::Dns01, Noop);

        let offered = ["http-01", "tls-alpn-01", "dns-01"];
        assert_eq!(
            solvers.select(&ALL, offered.iter().copied()),
            Some(ChallengeType::Dns01)
        );

        let reversed = [ChallengeType::Http01, ChallengeType::Dns01];
        assert_eq!(
            solvers.select(&reversed, offered.iter().copied()),
            Some(ChallengeType::Http01)
        );
    }

    #[test]
    fn select_skips_types_without_solver() {
        let solvers = Solvers::new().with(ChallengeType::TlsAlpn01, Noop);

        let offered = ["http-01", "dns-01"];
        assert_eq!(solvers.select(&ALL, offered.iter().copied()), None);

        let offered = ["dns-01", "tls-alpn-01"];
        assert_eq!(
            solvers.select(&ALL, offered.iter().copied()),
            Some(ChallengeType::TlsAlpn01)
        );
    }

    #[test]
    fn proofs_per_type() {
        let key = AccountKey::generate();
        let token = "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w";
        let key_auth = format!("{token}.{}", key.thumbprint().unwrap());

        assert_eq!(ChallengeType::Http01.proof(token, &key).unwrap(), key_auth);
        assert_eq!(ChallengeType::TlsAlpn01.proof(token, &key).unwrap(), key_auth);

        let dns = ChallengeType::Dns01.proof(token, &key).unwrap();
        assert_eq!(dns, BASE64_URL_SAFE_NO_PAD.encode(tls_alpn_digest(&key_auth)));
        assert_eq!(dns.len(), 43);
    }

    #[test]
    fn parse_challenge_type() {
        for ty in ALL {
            assert_eq!(ty.as_str().parse::<ChallengeType>().unwrap(), ty);
        }
        assert!("email-reply-00".parse::<ChallengeType>().is_err());
    }
}
