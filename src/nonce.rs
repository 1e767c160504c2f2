use std::collections::VecDeque;

use parking_lot::{Mutex, RwLock};
use reqwest::header::HeaderMap;

use crate::{
    error::{Error, Result},
    req::{replay_nonce, HttpClient},
};

/// Shared pool of nonces.
///
/// One pool belongs to one client instance and is shared by every request that client signs,
/// whichever identifier worker issues it. A nonce popped from the pool, or fetched fresh from the
/// newNonce endpoint, is handed to exactly one caller.
#[derive(Debug)]
pub(crate) struct NoncePool {
    http: HttpClient,
    nonce_url: RwLock<String>,
    pool: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl NoncePool {
    pub(crate) fn new(http: HttpClient, nonce_url: &str, capacity: usize) -> Self {
        NoncePool {
            http,
            nonce_url: RwLock::new(nonce_url.to_owned()),
            pool: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Points the pool at a new newNonce URL after the directory was refreshed.
    pub(crate) fn set_nonce_url(&self, nonce_url: &str) {
        *self.nonce_url.write() = nonce_url.to_owned();
    }

    /// Takes a nonce out of the pool, or asks the server for a new one if the pool is empty.
    pub(crate) async fn acquire(&self) -> Result<String> {
        let pooled = self.pool.lock().pop_front();
        if let Some(nonce) = pooled {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        let url = self.nonce_url.read().clone();

        log::debug!("Request new nonce");
        let res = self.http.head(&url).await?;

        if !res.status().is_success() {
            let res = self.http.read(res).await?;
            return Err(res.into_result().err().unwrap_or(Error::MissingHeader {
                url,
                header: "Replay-Nonce",
            }));
        }

        replay_nonce(res.headers()).ok_or(Error::MissingHeader {
            url,
            header: "Replay-Nonce",
        })
    }

    /// Adds a nonce handed out by the server. Once the pool is full the oldest nonce is dropped,
    /// being the one most likely to have expired server side.
    pub(crate) fn replenish(&self, nonce: String) {
        log::trace!("Extracting new nonce");

        let mut pool = self.pool.lock();
        pool.push_back(nonce);

        while pool.len() > self.capacity {
            pool.pop_front();
        }
    }

    /// Replenishes from the `Replay-Nonce` header, if present and well formed.
    pub(crate) fn extract(&self, headers: &HeaderMap) {
        if let Some(nonce) = replay_nonce(headers) {
            self.replenish(nonce);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().len()
    }
}
