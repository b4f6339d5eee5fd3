//! Response header contract of the image endpoint.

use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, LAST_MODIFIED,
    STRICT_TRANSPORT_SECURITY, VARY,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Months, Utc};

pub const CACHE_ONE_YEAR: &str = "public, max-age=31536000, immutable";
pub const LITESPEED_CACHE_ONE_YEAR: &str = "max-age=31536000";

static X_LITESPEED_CACHE_CONTROL: HeaderName =
    HeaderName::from_static("x-litespeed-cache-control");
static X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");
static X_BUCKET_CODE: HeaderName = HeaderName::from_static("x-bucket-code");
static X_OSS_HASH_CRC64ECMA: HeaderName = HeaderName::from_static("x-oss-hash-crc64ecma");
static X_OSS_OBJECT_TYPE: HeaderName = HeaderName::from_static("x-oss-object-type");
static X_OSS_REQUEST_ID: HeaderName = HeaderName::from_static("x-oss-request-id");
static X_OSS_SERVER_TIME: HeaderName = HeaderName::from_static("x-oss-server-time");
static X_OSS_STORAGE_CLASS: HeaderName = HeaderName::from_static("x-oss-storage-class");

/// Upstream headers copied onto the client response.
const PASSTHROUGH: [HeaderName; 4] = [CONTENT_TYPE, CONTENT_LENGTH, ACCEPT_RANGES, LAST_MODIFIED];

/// CORS, HSTS and `X-Powered-By`, set on every image-endpoint response.
pub fn apply_proxy_headers(headers: &mut HeaderMap) {
    use axum::http::header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_MAX_AGE,
    };

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("1728000"));
    headers.insert(
        STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=86400"),
    );
    if let Ok(value) = HeaderValue::from_str(&powered_by()) {
        headers.insert(X_POWERED_BY.clone(), value);
    }
}

pub fn powered_by() -> String {
    format!(
        "thumbs {}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH
    )
}

/// Headers of a successful image response.
#[derive(Debug, Clone)]
pub struct ImageHeaders<'a> {
    pub video_id: &'a str,
    pub request_id: &'a str,
    pub litespeed_cache: bool,
    pub now: DateTime<Utc>,
}

impl ImageHeaders<'_> {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_ONE_YEAR));
        if self.litespeed_cache {
            headers.insert(
                X_LITESPEED_CACHE_CONTROL.clone(),
                HeaderValue::from_static(LITESPEED_CACHE_ONE_YEAR),
            );
        }
        if let Ok(expires) = HeaderValue::from_str(&http_date(one_year_after(self.now))) {
            headers.insert(EXPIRES, expires);
        }
        headers.insert(VARY, HeaderValue::from_static("Accept"));

        headers.insert(X_BUCKET_CODE.clone(), HeaderValue::from_static("3"));
        headers.insert(
            X_OSS_HASH_CRC64ECMA.clone(),
            HeaderValue::from(crc64_ecma(self.video_id.as_bytes())),
        );
        headers.insert(X_OSS_OBJECT_TYPE.clone(), HeaderValue::from_static("Normal"));
        if let Ok(request_id) = HeaderValue::from_str(self.request_id) {
            headers.insert(X_OSS_REQUEST_ID.clone(), request_id);
        }
        headers.insert(X_OSS_SERVER_TIME.clone(), HeaderValue::from_static("2"));
        headers.insert(
            X_OSS_STORAGE_CLASS.clone(),
            HeaderValue::from_static("Standard"),
        );
    }
}

/// Copies `Content-Type`, `Content-Length`, `Accept-Ranges` and
/// `Last-Modified` from the upstream response.
pub fn copy_passthrough(upstream: &HeaderMap, headers: &mut HeaderMap) {
    for name in &PASSTHROUGH {
        if let Some(value) = upstream.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn one_year_after(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(12)).unwrap_or(now)
}

/// IMF-fixdate, as used by `Expires`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

const CRC64_ECMA_REFLECTED: u64 = 0xC96C_5795_D787_0F42;

const fn crc64_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC64_ECMA_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC64_TABLE: [u64; 256] = crc64_table();

/// CRC-64/ECMA-182 in its reflected form (also known as CRC-64/XZ).
pub fn crc64_ecma(data: &[u8]) -> u64 {
    let crc = data.iter().fold(!0u64, |crc, &byte| {
        CRC64_TABLE[((crc ^ u64::from(byte)) & 0xff) as usize] ^ (crc >> 8)
    });
    !crc
}
