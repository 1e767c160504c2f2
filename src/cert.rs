use std::{
    collections::HashSet,
    io::{BufReader, Cursor},
};

use der::{
    asn1::{Ia5String, ObjectIdentifier},
    time::{OffsetDateTime, PrimitiveDateTime},
    Decode as _, Encode as _,
};
use eyre::{eyre, WrapErr as _};
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        Extension,
    },
    name::Name,
    request::CertReq,
};

use crate::{
    config::ChainPreference,
    error::{Error, Result},
    trans::Transport,
};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");
const OID_EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// Issuer chains longer than this are cut off.
const MAX_CHAIN_LENGTH: usize = 10;

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Creates a CSR for `domains` signed with `signer`, DER encoded.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All domains are added to a
/// Subject Alternative Name (SAN) extension.
pub fn create_csr(signer: &p256::ecdsa::SigningKey, domains: &[&str]) -> eyre::Result<Vec<u8>> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| eyre!("a CSR needs at least one domain"))?;
    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .wrap_err_with(|| format!("invalid domain name {primary_domain}"))?;

    let mut csr = CsrBuilder::new(subject, signer).wrap_err("csr builder")?;

    let names = domains
        .iter()
        .map(|domain| Ia5String::new(domain).map(GeneralName::DnsName))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("domain names must be ASCII")?;
    csr.add_extension(&SubjectAltName(names))
        .wrap_err("add SAN extension")?;

    let csr = csr
        .build::<p256::ecdsa::DerSignature>()
        .wrap_err("build csr")?;

    csr.to_der().wrap_err("encode csr")
}

/// DNS names a DER encoded CSR asks for: the SAN entries, or the CN if there is no SAN.
pub(crate) fn csr_identifiers(csr_der: &[u8]) -> eyre::Result<Vec<String>> {
    let csr = CertReq::from_der(csr_der).wrap_err("parse csr")?;

    let mut names = vec![];

    for attr in csr.info.attributes.iter() {
        if attr.oid != OID_EXTENSION_REQUEST {
            continue;
        }

        for value in attr.values.iter() {
            let extensions = Vec::<Extension>::from_der(&value.to_der()?)?;

            for ext in extensions {
                if ext.extn_id != OID_SUBJECT_ALT_NAME {
                    continue;
                }

                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
                names.extend(san.0.iter().filter_map(|name| match name {
                    GeneralName::DnsName(dns) => Some(dns.to_string()),
                    _ => None,
                }));
            }
        }
    }

    if names.is_empty() {
        for rdn in csr.info.subject.0.iter() {
            for atv in rdn.0.iter() {
                if atv.oid == OID_COMMON_NAME {
                    names.push(String::from_utf8(atv.value.value().to_vec())?);
                }
            }
        }
    }

    Ok(names)
}

/// Fails with [`Error::CsrMismatch`] unless the CSR names exactly `expected`.
pub(crate) fn check_csr_identifiers(csr_der: &[u8], expected: &[String]) -> Result<()> {
    let normalize = |names: &[String]| {
        let mut names = names
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        names
    };

    let found = csr_identifiers(csr_der)?;

    if normalize(&found) != normalize(expected) {
        return Err(Error::CsrMismatch {
            expected: expected.to_vec(),
            found,
        });
    }

    Ok(())
}

/// An issued certificate and its issuer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// DER encoded, leaf first, each followed by its issuer.
    chain: Vec<Vec<u8>>,
    url: String,
    alternates: Vec<String>,
}

impl CertificateBundle {
    /// Reads a PEM encoded chain, leaf first.
    pub fn from_pem(pem: &str) -> eyre::Result<Self> {
        let chain = parse_pem_chain(pem.as_bytes())?;

        if chain.is_empty() {
            return Err(eyre!("no certificates in PEM"));
        }

        for cert in &chain {
            x509_cert::Certificate::from_der(cert)?;
        }

        Ok(Self {
            chain,
            url: String::new(),
            alternates: vec![],
        })
    }

    /// The end-entity certificate in DER encoding.
    pub fn leaf_der(&self) -> &[u8] {
        &self.chain[0]
    }

    /// Issuer certificates in DER encoding, closest to the leaf first.
    pub fn issuers_der(&self) -> &[Vec<u8>] {
        &self.chain[1..]
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// The whole chain as concatenated PEM, as web servers expect it.
    pub fn to_pem(&self) -> eyre::Result<String> {
        let mut out = String::new();

        for der in &self.chain {
            out.push_str(&pem::encode_string("CERTIFICATE", pem::LineEnding::LF, der)?);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        Ok(out)
    }

    /// The URL the certificate was downloaded from. Empty for bundles read from PEM.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URLs of alternate chains the server offered for this certificate.
    pub fn alternates(&self) -> &[String] {
        &self.alternates
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> eyre::Result<i64> {
        let cert = x509_cert::Certificate::from_der(self.leaf_der())?;

        let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
        // X.509 times are always UTC
        let not_after = PrimitiveDateTime::try_from(not_after)?.assume_utc();

        let diff = not_after - OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}

/// Downloads the certificate at `url` and its issuers.
///
/// With [`ChainPreference::Index`] the n-th alternate chain offered by the server is fetched
/// instead. Issuers are discovered through `Link: rel="up"`, recursively.
pub(crate) async fn download_chain(
    transport: &Transport,
    url: &str,
    preference: ChainPreference,
) -> Result<CertificateBundle> {
    log::debug!("Downloading certificate {url}");
    let res = transport.post_as_get(url).await?;
    let alternates = res.links("alternate");

    let (url, res) = match preference {
        ChainPreference::Default | ChainPreference::Index(0) => (url.to_owned(), res),
        ChainPreference::Index(idx) => {
            let alt = alternates.get(idx - 1).ok_or_else(|| {
                eyre!(
                    "chain {idx} requested, server offers {} alternate chains",
                    alternates.len()
                )
            })?;
            log::debug!("Using alternate chain {alt}");
            (alt.clone(), transport.post_as_get(alt).await?)
        }
    };

    let mut chain = parse_certificates(res.body())?;
    if chain.is_empty() {
        return Err(eyre!("no certificate at {url}").into());
    }

    let mut seen = HashSet::from([url.clone()]);
    let mut up = res.link("up");

    while let Some(issuer_url) = up.take() {
        if !seen.insert(issuer_url.clone()) {
            log::warn!("Issuer chain of {url} loops back to {issuer_url}");
            break;
        }
        if chain.len() >= MAX_CHAIN_LENGTH {
            log::warn!("Issuer chain of {url} cut off after {MAX_CHAIN_LENGTH} certificates");
            break;
        }

        log::debug!("Downloading issuer {issuer_url}");
        let res = transport.post_as_get(&issuer_url).await?;
        for cert in parse_certificates(res.body())? {
            if !chain.contains(&cert) {
                chain.push(cert);
            }
        }

        up = res.link("up");
    }

    Ok(CertificateBundle {
        chain,
        url,
        alternates,
    })
}

/// Certificates from a PEM chain, or a single DER certificate.
fn parse_certificates(body: &[u8]) -> eyre::Result<Vec<Vec<u8>>> {
    let chain = parse_pem_chain(body)?;
    if !chain.is_empty() {
        return Ok(chain);
    }

    x509_cert::Certificate::from_der(body).wrap_err("response is neither PEM nor DER")?;
    Ok(vec![body.to_vec()])
}

fn parse_pem_chain(pem: &[u8]) -> eyre::Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}
