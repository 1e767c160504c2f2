//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2 to
//! issue/renew certificates.
//!
//! # Usage
//!
//! 1. Fetch the [`Directory`] of your ACME provider.
//! 2. Register an [`Account`] (or look up an existing one) with an [`AccountKey`].
//! 3. Create an [`Order`](order::Order) for the domain names of the certificate.
//! 4. Hand it to an [`Orchestrator`] together with a [`ChallengeSolver`] per challenge type you
//!    can answer. It proves control of all names, finalizes the order with your CSR and
//!    downloads the [`CertificateBundle`].
//!
//! ## Examples
//!
//! Complete usage examples are provided in the source repository:
//!
//! - `demos/http-01.rs`
//! - `demos/account-management.rs`
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering TLS or HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! A [`ChallengeSolver`] makes those changes: it publishes a proof before the ACME server is asked
//! to validate and removes it afterwards, whether validation succeeded or not.
//!
//! For `dns-01`, [`Orchestrator::with_dns_lookup`] enables a self-check against the zone's
//! authoritative servers, so the server is only asked to validate once the record is visible.
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. The
//! orchestrator works on several of them at once, see [`OrderPolicy::concurrency`]. If any of
//! them fails, the others still run to completion and the error carries an
//! [`AuthorizationReport`].
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the [`Backoff`] delays really low, but balance this against the real
//! risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cancel;
mod cert;
mod dir;
mod error;
mod jws;
mod nonce;
mod req;
mod solver;
mod trans;

pub mod api;
pub mod config;
pub mod dns;
pub mod order;


pub use crate::{
    acc::{Account, AccountKey, RevocationReason},
    cancel::CancelToken,
    cert::{create_csr, create_p256_key, CertificateBundle},
    config::{Backoff, ChainPreference, ClientConfig, OrderPolicy, PropagationCheck},
    dir::{Directory, DirectoryUrl},
    dns::{AuthoritativeLookup, PropagationChecker, Zone},
    error::{Error, Result},
    order::{AuthorizationReport, IdentifierOutcome, Orchestrator, Order, OrderState},
    solver::{key_authorization, tls_alpn_digest, ChallengeSolver, ChallengeType, Solvers},
};
