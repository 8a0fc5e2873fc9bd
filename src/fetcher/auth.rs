// Authentication for remote HTTP sources

use base64::Engine;
use std::collections::BTreeMap;

use crate::config::AuthMethod;
use crate::s3::{signed_request_headers, SigV4Credentials, SigningError};

/// Headers to attach to a source request for the given auth method
///
/// `base_headers` are the headers the request already carries; for SigV4
/// they are part of the signature, so the returned map replaces them.
pub fn auth_headers(
    method: &AuthMethod,
    http_method: &str,
    url: &str,
    base_headers: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, SigningError> {
    let mut headers = base_headers.clone();

    match method {
        AuthMethod::Bearer { token } => {
            headers.insert("authorization".to_string(), format!("Bearer {}", token));
        }
        AuthMethod::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            headers.insert("authorization".to_string(), format!("Basic {}", encoded));
        }
        AuthMethod::Header { name, value } => {
            headers.insert(name.to_lowercase(), value.clone());
        }
        AuthMethod::AwsSigv4 {
            access_key,
            secret_key,
            region,
            service,
            session_token,
        } => {
            let credentials = SigV4Credentials {
                access_key,
                secret_key,
                region,
                service,
                session_token: session_token.as_deref(),
            };
            headers = signed_request_headers(
                http_method,
                url,
                base_headers,
                &credentials,
                chrono::Utc::now(),
            )?;
        }
    }

    Ok(headers)
}

/// Whether an origin status is an authentication failure
pub fn is_auth_failure(status: u16) -> bool {
    status == 401 || status == 403
}
