//! HTTP primitives: bounded body reads and the protocol-relevant response headers.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER},
    StatusCode, Url,
};
use serde::de::DeserializeOwned;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::{
    api::Problem,
    config::ClientConfig,
    error::{Error, Result},
};

pub(crate) const REPLAY_NONCE: &str = "replay-nonce";

/// Thin wrapper over a pooled `reqwest` client that enforces the body size ceiling.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    max_body_size: usize,
}

impl HttpClient {
    pub(crate) fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|source| Error::Transport {
                url: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            max_body_size: config.max_body_size,
        })
    }

    pub(crate) async fn get(&self, url: &str) -> Result<Response> {
        log::trace!("GET {url}");
        let res = self.client.get(url).send().await.map_err(transport(url))?;
        self.read(res).await
    }

    /// Sends a HEAD request; only the headers of the response are of interest.
    pub(crate) async fn head(&self, url: &str) -> Result<reqwest::Response> {
        log::trace!("HEAD {url}");
        self.client.head(url).send().await.map_err(transport(url))
    }

    /// Posts a signed JWS body. The body is not read yet, so that the nonce can be taken from the
    /// headers even when the body turns out to be too large.
    pub(crate) async fn post_jose(&self, url: &str, body: String) -> Result<reqwest::Response> {
        log::trace!("POST {url} {body}");
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/jose+json")
            .body(body)
            .send()
            .await
            .map_err(transport(url))
    }

    /// Reads the body of `res`, failing once it grows past the configured ceiling.
    pub(crate) async fn read(&self, mut res: reqwest::Response) -> Result<Response> {
        let url = res.url().to_string();
        let limit = self.max_body_size;

        if res.content_length().is_some_and(|len| len > limit as u64) {
            return Err(Error::SizeLimit { url, limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = res.chunk().await.map_err(transport(&url))? {
            if body.len() + chunk.len() > limit {
                return Err(Error::SizeLimit { url, limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Response {
            url,
            status: res.status(),
            headers: res.headers().clone(),
            body,
        })
    }
}

fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> Error + '_ {
    move |source| Error::Transport {
        url: url.to_owned(),
        source,
    }
}

/// Returns the `Replay-Nonce` header value, if it is a well-formed nonce.
///
/// > The value of the Replay-Nonce header field MUST be an octet string encoded according to the
/// > base64url encoding [...] Clients MUST ignore invalid Replay-Nonce values.
///
/// See [RFC 8555 §6.5.1](https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1).
pub(crate) fn replay_nonce(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(REPLAY_NONCE)?.to_str().ok()?.trim();

    let is_base64url = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if value.is_empty() || !is_base64url {
        log::debug!("Ignoring invalid replay-nonce: {value:?}");
        return None;
    }

    Some(value.to_owned())
}

/// A fully read response.
#[derive(Debug, Clone)]
pub(crate) struct Response {
    url: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|err| eyre::eyre!("response from {} is not UTF-8: {err}", self.url).into())
    }

    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T> {
        log::trace!("{}", String::from_utf8_lossy(&self.body));
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The `Location` header, which protocol responses creating a resource must carry.
    pub(crate) fn location(&self) -> Result<String> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::MissingHeader {
                url: self.url.clone(),
                header: "Location",
            })
    }

    /// All `Link` targets with relation `rel`, resolved against the request URL.
    pub(crate) fn links(&self, rel: &str) -> Vec<String> {
        let base = Url::parse(&self.url).ok();

        self.headers
            .get_all(LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(parse_link_header)
            .filter(|link| link.rels.iter().any(|r| r.eq_ignore_ascii_case(rel)))
            .map(|link| match &base {
                Some(base) => base
                    .join(&link.target)
                    .map(String::from)
                    .unwrap_or(link.target),
                None => link.target,
            })
            .collect()
    }

    pub(crate) fn link(&self, rel: &str) -> Option<String> {
        self.links(rel).into_iter().next()
    }

    /// The server's hint on when to poll next.
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(RETRY_AFTER)?.to_str().ok()?;
        parse_retry_after(value, OffsetDateTime::now_utc())
    }

    /// Turns error statuses into a [`Problem`].
    pub(crate) fn into_result(self) -> Result<Self> {
        // ok responses pass through
        if self.status.is_success() {
            return Ok(self);
        }

        Err(Error::Protocol(self.problem()))
    }

    fn problem(&self) -> Problem {
        let status = self.status.as_u16();
        let body = String::from_utf8_lossy(&self.body);

        let is_problem_json = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/problem+json"));

        let mut problem = if is_problem_json {
            // if we were sent a problem+json, deserialize it
            serde_json::from_str(&body).unwrap_or_else(|err| Problem {
                _type: "problemJsonFail".to_owned(),
                detail: Some(format!(
                    "Failed to deserialize application/problem+json ({err}) body: {body}"
                )),
                ..Default::default()
            })
        } else {
            // some other problem
            Problem {
                _type: "httpReqError".to_owned(),
                detail: Some(format!("{} body: {body}", self.status)),
                ..Default::default()
            }
        };

        problem.status.get_or_insert(status);
        problem
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) target: String,
    pub(crate) rels: Vec<String>,
}

/// Parses an [RFC 8288] `Link` header value, e.g.
/// `<https://example.com/acme/cert/1/1>;rel="alternate", <https://example.com/issuer>;rel="up"`.
///
/// [RFC 8288]: https://datatracker.ietf.org/doc/html/rfc8288#section-3
pub(crate) fn parse_link_header(value: &str) -> Vec<Link> {
    let mut links = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };

        let target = after[..end].trim().to_owned();
        let params = &after[end + 1..];
        let params_end = params.find('<').unwrap_or(params.len());

        let rels = params[..params_end]
            .split(';')
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("rel")
                    .then(|| value.trim().trim_end_matches(',').trim().trim_matches('"'))
            })
            .flat_map(str::split_whitespace)
            .map(ToOwned::to_owned)
            .collect();

        links.push(Link { target, rels });
        rest = &params[params_end..];
    }

    links
}

/// Parses a `Retry-After` value, either delay-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub(crate) fn parse_retry_after(value: &str, now: OffsetDateTime) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // HTTP-date is the RFC 2822 format with the obsolete "GMT" zone.
    let date = match value.strip_suffix("GMT") {
        Some(prefix) => format!("{prefix}+0000"),
        None => value.to_owned(),
    };
    let at = OffsetDateTime::parse(&date, &Rfc2822).ok()?;

    Some((at - now).try_into().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;
    use crate::{test::with_directory_server, Directory, DirectoryUrl};

    fn client(max_body_size: usize) -> HttpClient {
        HttpClient::new(&ClientConfig {
            max_body_size,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn body_over_declared_length_is_refused() {
        let server = with_directory_server();

        let config = ClientConfig {
            max_body_size: 64,
            ..Default::default()
        };
        let err = Directory::fetch_with_config(DirectoryUrl::Other(&server.dir_url), config)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SizeLimit { limit: 64, .. }), "{err}");
        assert_eq!(
            err.to_string(),
            format!("response body from {} exceeds 64 bytes", server.dir_url)
        );
    }

    #[tokio::test]
    async fn chunked_body_is_capped_while_reading() {
        let server = with_directory_server();
        let url = format!("{}/chunked/1000", server.url);

        // no length to check up front
        let res = reqwest::get(&url).await.unwrap();
        assert_eq!(res.content_length(), None);

        let err = client(64).get(&url).await.unwrap_err();
        assert!(matches!(err, Error::SizeLimit { limit: 64, .. }), "{err}");

        // the ceiling itself is allowed
        let res = client(64)
            .get(&format!("{}/chunked/64", server.url))
            .await
            .unwrap();
        assert_eq!(res.body().len(), 64);
    }

    #[test]
    fn link_header_with_multiple_entries() {
        let links = parse_link_header(
            r#"<https://example.com/acme/cert/mAt3xBGaobw/1>;rel="alternate", <https://example.com/acme/issuer>; rel=up"#,
        );

        assert_eq!(
            links,
            [
                Link {
                    target: "https://example.com/acme/cert/mAt3xBGaobw/1".to_owned(),
                    rels: vec!["alternate".to_owned()],
                },
                Link {
                    target: "https://example.com/acme/issuer".to_owned(),
                    rels: vec!["up".to_owned()],
                },
            ]
        );
    }

    #[test]
    fn link_header_with_multiple_rels() {
        let links = parse_link_header(r#"<https://example.com/dir>;rel="index up""#);
        assert_eq!(links[0].rels, ["index", "up"]);
    }

    #[test]
    fn link_header_garbage() {
        assert!(parse_link_header("").is_empty());
        assert!(parse_link_header("<https://example.com/unterminated").is_empty());
    }

    #[test]
    fn retry_after_seconds() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(parse_retry_after("5", now), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn retry_after_http_date() {
        let now = OffsetDateTime::parse("Wed, 21 Oct 2015 07:28:00 +0000", &Rfc2822).unwrap();

        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn nonce_validation() {
        let mut headers = HeaderMap::new();
        assert_eq!(replay_nonce(&headers), None);

        headers.insert(REPLAY_NONCE, HeaderValue::from_static("oFvnlFP1wIhRlYS2jTaXbA"));
        assert_eq!(
            replay_nonce(&headers).as_deref(),
            Some("oFvnlFP1wIhRlYS2jTaXbA")
        );

        headers.insert(REPLAY_NONCE, HeaderValue::from_static("not+base64url="));
        assert_eq!(replay_nonce(&headers), None);
    }

    fn response(status: StatusCode, headers: HeaderMap, body: &str) -> Response {
        Response {
            url: "https://example.com/acme/cert/1".to_owned(),
            status,
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn relative_links_are_resolved() {
        let mut headers = HeaderMap::new();
        headers.append(LINK, HeaderValue::from_static("</acme/issuer/a>;rel=\"up\""));
        headers.append(LINK, HeaderValue::from_static("</acme/cert/1/1>;rel=\"alternate\""));

        let res = response(StatusCode::OK, headers, "");
        assert_eq!(
            res.link("up").as_deref(),
            Some("https://example.com/acme/issuer/a")
        );
        assert_eq!(res.links("alternate"), ["https://example.com/acme/cert/1/1"]);
        assert_eq!(res.link("index"), None);
    }

    #[test]
    fn problem_document_is_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );

        let res = response(
            StatusCode::BAD_REQUEST,
            headers,
            r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce"}"#,
        );

        let Err(Error::Protocol(problem)) = res.into_result() else {
            panic!("expected protocol error");
        };
        assert!(problem.is_bad_nonce());
        assert_eq!(problem.status, Some(400));
    }

    #[test]
    fn plain_error_becomes_problem() {
        let res = response(StatusCode::BAD_GATEWAY, HeaderMap::new(), "upstream down");

        let Err(err) = res.into_result() else {
            panic!("expected error");
        };
        assert!(err.is_transient());
        assert_eq!(err.problem().unwrap()._type, "httpReqError");
    }
}
