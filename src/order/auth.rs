use std::time::Duration;

use crate::{
    api::{self, AuthorizationStatus, ChallengeStatus},
    error::{Error, Result},
    order::{
        poll::{poll_until, Poll},
        IdentifierOutcome, Orchestrator,
    },
    solver::{ChallengeSolver, ChallengeType},
};

/// Proving control of one identifier.
///
/// Each identifier runs strictly sequentially: present, self-check, signal, poll, clean up.
/// Several identifiers of an order run this concurrently.
impl Orchestrator {
    pub(super) async fn authorize_identifier(&self, authz_url: &str) -> IdentifierOutcome {
        let mut outcome = IdentifierOutcome::new(authz_url);

        let authz = match self
            .cancel
            .run(self.fetch_authorization(authz_url))
            .await
            .and_then(|res| res)
        {
            Ok((authz, _)) => authz,
            Err(err) => return outcome.fail(err),
        };
        outcome.identifier.clone_from(&authz.identifier.value);
        let identifier = outcome.identifier.clone();

        match authz.status {
            AuthorizationStatus::Valid => {
                log::info!("{identifier} is already authorized");
                outcome.result = Ok(AuthorizationStatus::Valid);
                return outcome;
            }
            AuthorizationStatus::Pending => {}
            status => {
                return outcome.fail(Error::Validation {
                    identifier,
                    status: status.as_str().to_owned(),
                    problem: authz.challenge_error().cloned(),
                })
            }
        }

        let offered = authz.challenges.iter().map(|c| c._type.as_str());
        let selected = self
            .solvers
            .select(&self.policy.challenge_priority, offered)
            .and_then(|ty| Some((ty, authz.challenge(ty.as_str())?, self.solvers.get(ty)?)));

        let Some((ty, challenge, solver)) = selected else {
            return outcome.fail(Error::UnsupportedChallenge {
                identifier,
                offered: authz.challenges.iter().map(|c| c._type.clone()).collect(),
            });
        };
        outcome.challenge = Some(ty);

        let proof = match ty.proof(&challenge.token, self.account.account_key()) {
            Ok(proof) => proof,
            Err(err) => return outcome.fail(err.into()),
        };

        log::info!("Presenting {ty} proof for {identifier} with {}", solver.name());
        match self
            .cancel
            .run(solver.present(&identifier, &challenge.token, &proof))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => {
                return outcome.fail(Error::Provider {
                    provider: solver.name().to_owned(),
                    identifier,
                    cause,
                })
            }
            Err(err) => {
                // the provider may have published the proof before it was interrupted
                self.clean_up(&mut outcome, solver.as_ref(), ty, &challenge.token, &proof)
                    .await;
                return outcome.fail(err);
            }
        }

        outcome.result = self
            .validate(&identifier, authz_url, ty, challenge, &proof)
            .await;

        // Runs on every path once present succeeded, including cancellation.
        self.clean_up(&mut outcome, solver.as_ref(), ty, &challenge.token, &proof)
            .await;

        match &outcome.result {
            Ok(_) => log::info!("{identifier} authorized with {ty}"),
            Err(err) => log::warn!("{identifier} failed: {err}"),
        }

        outcome
    }

    /// Removes a presented proof. Failures are recorded on `outcome`, never returned.
    async fn clean_up(
        &self,
        outcome: &mut IdentifierOutcome,
        solver: &dyn ChallengeSolver,
        ty: ChallengeType,
        token: &str,
        proof: &str,
    ) {
        let identifier = &outcome.identifier;

        if let Err(err) = solver.cleanup(identifier, token, proof).await {
            log::warn!("Cleanup of {ty} proof for {identifier} failed: {err:#}");
            outcome.cleanup_error = Some(format!("{err:#}"));
        }
    }

    async fn validate(
        &self,
        identifier: &str,
        authz_url: &str,
        ty: ChallengeType,
        challenge: &api::Challenge,
        proof: &str,
    ) -> Result<AuthorizationStatus> {
        if ty.needs_propagation_check() && self.policy.propagation.enabled {
            match &self.propagation {
                Some(checker) => {
                    checker
                        .wait_for_txt(identifier, proof, &self.policy.propagation, &self.cancel)
                        .await?
                }
                None => log::debug!("No lookup configured, skipping {identifier} self-check"),
            }
        }

        if challenge.status == ChallengeStatus::Pending {
            log::debug!("Requesting {ty} validation of {identifier}");
            let transport = &self.account.inner().transport;
            self.cancel
                .run(transport.post(&challenge.url, &api::EmptyObject))
                .await??;
        }

        let what = format!("authorization of {identifier}");
        let authz = poll_until(&self.policy.backoff, &self.cancel, &what, move || async move {
            let (authz, retry_after) = self.fetch_authorization(authz_url).await?;

            Ok(if authz.status.is_terminal() {
                Poll::Ready(authz)
            } else {
                Poll::Pending { retry_after }
            })
        })
        .await?;

        if authz.status == AuthorizationStatus::Valid {
            Ok(AuthorizationStatus::Valid)
        } else {
            Err(Error::Validation {
                identifier: identifier.to_owned(),
                status: authz.status.as_str().to_owned(),
                problem: authz.challenge_error().cloned(),
            })
        }
    }

    async fn fetch_authorization(
        &self,
        url: &str,
    ) -> Result<(api::Authorization, Option<Duration>)> {
        let res = self.account.inner().transport.post_as_get(url).await?;
        Ok((res.json()?, res.retry_after()))
    }

    /// Deactivates an authorization that is still pending on the server.
    ///
    /// See [RFC 8555 §7.5.2](https://datatracker.ietf.org/doc/html/rfc8555#section-7.5.2).
    pub(super) async fn deactivate_authorization(&self, url: &str) {
        let transport = &self.account.inner().transport;

        match transport
            .post(url, &api::DeactivateAuthorization::default())
            .await
        {
            Ok(_) => log::info!("Deactivated authorization {url}"),
            Err(err) => log::warn!("Could not deactivate authorization {url}: {err}"),
        }
    }
}
