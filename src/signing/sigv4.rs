//! AWS Signature Version 4 signing for Bedrock runtime, Bedrock control plane and S3.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::BedrockSettings;
use crate::transport::HttpRequest;
use crate::{Error, ErrorContext, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers covered by the signature when present on the request.
const SIGNABLE_HEADERS: &[&str] = &["content-type"];

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn from_settings(settings: &BedrockSettings, service: &str) -> Self {
        Self::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            settings.session_token.clone(),
            settings.region.clone(),
            service,
        )
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sign `request` for its own URL.
    pub fn sign(&self, request: &mut HttpRequest, timestamp: DateTime<Utc>) -> Result<()> {
        let url = request.url.clone();
        self.sign_for(request, &url, timestamp)
    }

    /// Sign `request` as if it were sent to `signing_url`.
    ///
    /// Gateways forward the request to the native AWS host, so the signature
    /// must cover that host and path rather than the gateway's.
    pub fn sign_for(
        &self,
        request: &mut HttpRequest,
        signing_url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let parsed = url::Url::parse(signing_url).map_err(|e| {
            Error::validation_with_context(
                format!("invalid URL for signing: {}", e),
                ErrorContext::new().with_source("sigv4").with_details(signing_url),
            )
        })?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(Error::validation_with_context(
                    "missing host in URL",
                    ErrorContext::new().with_source("sigv4").with_details(signing_url),
                ))
            }
        };

        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(request.body_bytes()));

        let mut signed: Vec<(String, String)> = vec![
            ("host".into(), host),
            ("x-amz-content-sha256".into(), payload_hash.clone()),
            ("x-amz-date".into(), amz_date.clone()),
        ];
        if let Some(token) = &self.session_token {
            signed.push(("x-amz-security-token".into(), token.clone()));
        }
        for (k, v) in &request.headers {
            let lower = k.to_ascii_lowercase();
            if SIGNABLE_HEADERS.contains(&lower.as_str()) {
                signed.push((lower, v.trim().to_string()));
            }
        }
        signed.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = signed
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();
        let signed_headers = signed
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method.as_str(),
            self.canonical_uri(parsed.path()),
            canonical_query(&parsed),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, credential_scope, signed_headers, signature
        );

        request.headers.insert("x-amz-date".into(), amz_date);
        request
            .headers
            .insert("x-amz-content-sha256".into(), payload_hash);
        if let Some(token) = &self.session_token {
            request
                .headers
                .insert("x-amz-security-token".into(), token.clone());
        }
        request.headers.insert("authorization".into(), authorization);
        Ok(())
    }

    /// S3 signs the path as sent; every other service expects each segment encoded again.
    fn canonical_uri(&self, path: &str) -> String {
        if path.is_empty() {
            return "/".to_string();
        }
        if self.service == "s3" {
            return path.to_string();
        }
        path.split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> Result<String> {
        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;
        Ok(hex::encode(signature))
    }
}

fn canonical_query(url: &url::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| {
        Error::configuration_with_context(
            format!("HMAC key error: {}", e),
            ErrorContext::new().with_source("sigv4"),
        )
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
