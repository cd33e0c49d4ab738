//! AWS Signature Version 4 for S3 GET requests.
//!
//! Reference: https://docs.aws.amazon.com/IAM/latest/UserGuide/create-signed-request.html
//!
//! Only what the fetcher needs is covered: bodiless requests, no query
//! string, path-style object URLs.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of the empty string, the payload hash of a GET.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Long-lived or temporary credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub content_sha256: &'static str,
    pub security_token: Option<String>,
    pub authorization: String,
}

/// Percent-encode per the SigV4 rules: unreserved characters pass through,
/// everything else becomes `%XX`. `/` is kept when `keep_slash` is set.
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the per-day signing key.
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Build the canonical request for a bodiless GET.
///
/// `headers` must already be lowercase and sorted by name.
pub fn canonical_request(canonical_uri: &str, headers: &[(&str, &str)]) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = signed_header_names(headers);

    format!(
        "GET\n{}\n\n{}\n{}\n{}",
        canonical_uri, canonical_headers, signed_headers, EMPTY_PAYLOAD_SHA256
    )
}

fn signed_header_names(headers: &[(&str, &str)]) -> String {
    headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";")
}

/// Sign a GET of `canonical_uri` on `host` at time `now`.
pub fn sign_get(
    credentials: &Credentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(&str, &str)> = vec![
        ("host", host),
        ("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256),
        ("x-amz-date", &amz_date),
    ];
    if let Some(token) = credentials.session_token.as_deref() {
        headers.push(("x-amz-security-token", token));
    }

    let request = canonical_request(canonical_uri, &headers);
    let scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id,
        scope,
        signed_header_names(&headers),
        signature
    );

    SignedHeaders {
        content_sha256: EMPTY_PAYLOAD_SHA256,
        security_token: credentials.session_token.clone(),
        amz_date,
        authorization,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials(token: Option<&str>) -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_signing_key_known_vector() {
        // Published example from the AWS signing documentation.
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(hex::encode(Sha256::digest(b"")), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("2024/q1 report.csv", true), "2024/q1%20report.csv");
        assert_eq!(uri_encode("a/b", false), "a%2Fb");
        assert_eq!(uri_encode("r\u{e9}sum\u{e9}~_-.", true), "r%C3%A9sum%C3%A9~_-.");
    }

    #[test]
    fn test_canonical_request_layout() {
        let request = canonical_request(
            "/reports/2024/q1.csv",
            &[("host", "s3.amazonaws.com"), ("x-amz-date", "20240101T000000Z")],
        );
        let expected = format!(
            "GET\n/reports/2024/q1.csv\n\nhost:s3.amazonaws.com\nx-amz-date:20240101T000000Z\n\nhost;x-amz-date\n{}",
            EMPTY_PAYLOAD_SHA256
        );
        assert_eq!(request, expected);
    }

    #[test]
    fn test_sign_get_header_shape() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let signed = sign_get(
            &credentials(None),
            "us-east-1",
            "s3.us-east-1.amazonaws.com",
            "/reports/q1.csv",
            now,
        );

        assert_eq!(signed.amz_date, "20240102T030405Z");
        assert!(signed.security_token.is_none());
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        let signature = signed.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_session_token_is_signed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let signed = sign_get(&credentials(Some("tok")), "eu-west-1", "h", "/b/k", now);

        assert_eq!(signed.security_token.as_deref(), Some("tok"));
        assert!(signed
            .authorization
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = sign_get(&credentials(None), "us-east-1", "h", "/b/k", now);
        let b = sign_get(&credentials(None), "us-east-1", "h", "/b/k", now);
        let c = sign_get(&credentials(None), "us-east-1", "h", "/b/other", now);
        assert_eq!(a, b);
        assert_ne!(a.authorization, c.authorization);
    }
}
