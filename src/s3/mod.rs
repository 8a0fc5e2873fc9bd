// AWS Signature v4 request signing for remote origins behind S3-compatible
// endpoints

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid URL to sign: {0}")]
    InvalidUrl(String),
    #[error("Invalid signing key")]
    InvalidKey,
}

/// Credentials and scope used to sign a request
#[derive(Debug, Clone)]
pub struct SigV4Credentials<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub session_token: Option<&'a str>,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub struct SigningParams<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query_string: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload: &'a [u8],
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub date: &'a str,     // Format: YYYYMMDD
    pub datetime: &'a str, // Format: YYYYMMDDTHHMMSSZ
}

fn sorted_headers<'a>(params: &'a SigningParams) -> Vec<(String, &'a str)> {
    let mut headers: Vec<(String, &str)> = params
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    headers
}

fn signed_headers(params: &SigningParams) -> String {
    sorted_headers(params)
        .into_iter()
        .map(|(k, _)| k)
        .collect::<Vec<_>>()
        .join(";")
}

fn create_canonical_request(params: &SigningParams) -> String {
    let canonical_headers = sorted_headers(params)
        .into_iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n{}\n{}\n{}\n\n{}\n{}",
        params.method,
        params.uri,
        params.query_string,
        canonical_headers,
        signed_headers(params),
        sha256_hex(params.payload)
    )
}

fn credential_scope(params: &SigningParams) -> String {
    format!(
        "{}/{}/{}/aws4_request",
        params.date, params.region, params.service
    )
}

fn create_string_to_sign(params: &SigningParams) -> String {
    let canonical_request = create_canonical_request(params);

    format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        params.datetime,
        credential_scope(params),
        sha256_hex(canonical_request.as_bytes())
    )
}

fn derive_signing_key(
    secret_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute the `Authorization` header value for a request
pub fn sign_request(params: &SigningParams) -> Result<String, SigningError> {
    let string_to_sign = create_string_to_sign(params);
    let k_signing = derive_signing_key(
        params.secret_key,
        params.date,
        params.region,
        params.service,
    )?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        params.access_key,
        credential_scope(params),
        signed_headers(params),
        signature
    ))
}

/// Canonical query string: parameters sorted by name, then value
fn canonical_query(query: Option<&str>) -> String {
    let mut pairs: Vec<(&str, &str)> = query
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Headers to add to an unsigned GET/HEAD request so it is SigV4-signed
///
/// Returns `host`, `x-amz-date`, `x-amz-content-sha256`, the optional
/// `x-amz-security-token`, and `authorization`. Extra headers passed in are
/// included in the signature.
pub fn signed_request_headers(
    method: &str,
    url: &str,
    extra_headers: &BTreeMap<String, String>,
    credentials: &SigV4Credentials<'_>,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, String>, SigningError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| SigningError::InvalidUrl(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SigningError::InvalidUrl(format!("{} has no host", url)))?;
    let host = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(b"");

    let mut headers: BTreeMap<String, String> = extra_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();
    headers.insert("host".to_string(), host);
    headers.insert("x-amz-date".to_string(), datetime.clone());
    headers.insert("x-amz-content-sha256".to_string(), payload_hash);
    if let Some(token) = credentials.session_token {
        headers.insert("x-amz-security-token".to_string(), token.to_string());
    }

    let query_string = canonical_query(parsed.query());
    let params = SigningParams {
        method,
        uri: parsed.path(),
        query_string: &query_string,
        headers: &headers,
        payload: b"",
        access_key: credentials.access_key,
        secret_key: credentials.secret_key,
        region: credentials.region,
        service: credentials.service,
        date: &date,
        datetime: &datetime,
    };

    let authorization = sign_request(&params)?;
    headers.insert("authorization".to_string(), authorization);
    Ok(headers)
}
