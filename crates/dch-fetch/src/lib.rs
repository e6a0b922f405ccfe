//! Paginated, size-bounded, encoding-checked retrieval of harvest source
//! documents.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tracing::{debug, info_span, Instrument};

/// One page worth of source content. A 404 on any page after the first is
/// ordinary pagination exhaustion, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Content(Vec<u8>),
    NoMorePages,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("server responded with {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("connection error fetching {url}: {message}")]
    Connection { url: String, message: String },
    #[error("connection timed out fetching {url}")]
    Timeout { url: String },
    #[error("remote file is too big: allowed {allowed} bytes, got at least {got}")]
    TooLarge { allowed: u64, got: u64 },
    #[error("payload encoding '{detected}' is not in the allowed set")]
    Encoding { detected: String },
    #[error("could not read local file {path}: {message}")]
    LocalFile { path: String, message: String },
}

/// Exponential backoff for transient failures, capped per attempt.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Hard cap on one document, checked both against the declared
    /// content length and against the running total while streaming.
    pub max_bytes: u64,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Encoding allow-list; empty disables the check.
    pub allowed_encodings: Vec<String>,
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            timeout: Duration::from_secs(20),
            user_agent: None,
            allowed_encodings: Vec::new(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Abstraction over page retrieval so the reconciliation engine can be
/// exercised without a network.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str, page: u32) -> Result<Page, FetchError>;
}

#[derive(Debug)]
pub struct ContentFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl ContentFetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }

    async fn fetch_local(&self, path: &str) -> Result<Page, FetchError> {
        let bytes = tokio::fs::read(Path::new(path))
            .await
            .map_err(|e| FetchError::LocalFile {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        if bytes.len() as u64 > self.config.max_bytes {
            return Err(FetchError::TooLarge {
                allowed: self.config.max_bytes,
                got: bytes.len() as u64,
            });
        }
        validate_encoding(&bytes, None, &self.config.allowed_encodings)?;
        Ok(Page::Content(bytes))
    }

    async fn fetch_remote(&self, url: &str, page: u32) -> Result<Page, FetchError> {
        let mut attempt = 0;
        loop {
            match self.try_fetch(url, page).await {
                Ok(result) => return Ok(result),
                Err(err) if is_transient(&err) && attempt < self.config.backoff.max_retries => {
                    debug!(%url, attempt, error = %err, "transient fetch failure, backing off");
                    tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_fetch(&self, url: &str, page: u32) -> Result<Page, FetchError> {
        // probe first; servers that do not implement HEAD answer 405/501
        // and get a plain GET instead
        let declared_len = match self.client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == StatusCode::NOT_FOUND && page > 1 {
                    return Ok(Page::NoMorePages);
                }
                if status == StatusCode::METHOD_NOT_ALLOWED
                    || status == StatusCode::NOT_IMPLEMENTED
                {
                    None
                } else if !status.is_success() {
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                } else {
                    content_length(&resp)
                }
            }
            Err(err) => return Err(classify_request_error(err, url)),
        };

        if let Some(len) = declared_len {
            if len > self.config.max_bytes {
                return Err(FetchError::TooLarge {
                    allowed: self.config.max_bytes,
                    got: len,
                });
            }
        }

        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| classify_request_error(err, url))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND && page > 1 {
            return Ok(Page::NoMorePages);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let charset = declared_charset(&resp);
        let mut body = BoundedBuf::new(self.config.max_bytes);
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|err| classify_request_error(err, url))?
        {
            body.push(&chunk)?;
        }
        let bytes = body.into_inner();
        validate_encoding(&bytes, charset.as_deref(), &self.config.allowed_encodings)?;
        Ok(Page::Content(bytes))
    }
}

#[async_trait]
impl PageSource for ContentFetcher {
    async fn fetch_page(&self, url: &str, page: u32) -> Result<Page, FetchError> {
        let span = info_span!("fetch_page", url, page);
        if !url.to_ascii_lowercase().starts_with("http") {
            return self.fetch_local(url).instrument(span).await;
        }
        let page_url = paged_url(url, page);
        self.fetch_remote(&page_url, page).instrument(span).await
    }
}

/// Append the page parameter for pages past the first, re-using `?`/`&`
/// depending on whether the source URL already carries a query.
pub fn paged_url(url: &str, page: u32) -> String {
    if page <= 1 {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}page={page}")
}

/// Streaming accumulator that refuses to grow past its limit, so oversized
/// documents abort mid-stream instead of being buffered whole.
pub struct BoundedBuf {
    limit: u64,
    buf: Vec<u8>,
}

impl BoundedBuf {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            buf: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        let total = self.buf.len() as u64 + chunk.len() as u64;
        if total > self.limit {
            return Err(FetchError::TooLarge {
                allowed: self.limit,
                got: total,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reject a payload only when it is confidently a disallowed encoding:
/// either the server declared a charset outside the allow-list, or the
/// allow-list is UTF-8-only and the bytes are not valid UTF-8.
pub fn validate_encoding(
    bytes: &[u8],
    declared_charset: Option<&str>,
    allowed: &[String],
) -> Result<(), FetchError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let allowed_normalized: Vec<String> =
        allowed.iter().map(|name| normalize_encoding(name)).collect();

    if let Some(declared) = declared_charset {
        let declared = normalize_encoding(declared);
        if !allowed_normalized.contains(&declared) {
            return Err(FetchError::Encoding { detected: declared });
        }
        return Ok(());
    }

    let utf8_only = allowed_normalized.iter().all(|name| name == "utf8");
    if utf8_only && std::str::from_utf8(bytes).is_err() {
        return Err(FetchError::Encoding {
            detected: "non-UTF-8".to_string(),
        });
    }
    Ok(())
}

fn normalize_encoding(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn content_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn declared_charset(resp: &Response) -> Option<String> {
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)?
        .to_str()
        .ok()?;
    let charset = content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))?;
    Some(charset.trim_matches('"').to_string())
}

fn classify_request_error(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn is_transient(err: &FetchError) -> bool {
    match err {
        FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
        FetchError::Connection { .. } | FetchError::Timeout { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn paged_urls_reuse_existing_query_strings() {
        assert_eq!(paged_url("http://a.org/data.json", 1), "http://a.org/data.json");
        assert_eq!(
            paged_url("http://a.org/data.json", 2),
            "http://a.org/data.json?page=2"
        );
        assert_eq!(
            paged_url("http://a.org/data.json?key=x", 3),
            "http://a.org/data.json?key=x&page=3"
        );
    }

    #[test]
    fn bounded_buf_aborts_mid_stream() {
        let mut buf = BoundedBuf::new(10);
        buf.push(b"12345").unwrap();
        buf.push(b"67890").unwrap();
        let err = buf.push(b"1").unwrap_err();
        match err {
            FetchError::TooLarge { allowed, got } => {
                assert_eq!(allowed, 10);
                assert_eq!(got, 11);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn declared_charset_outside_allow_list_is_rejected() {
        let allowed = vec!["utf-8".to_string(), "ascii".to_string()];
        assert!(validate_encoding(b"abc", Some("UTF-8"), &allowed).is_ok());
        assert!(validate_encoding(b"abc", Some("ISO-8859-1"), &allowed).is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected_only_for_utf8_only_allow_lists() {
        let utf8_only = vec!["utf-8".to_string()];
        assert!(validate_encoding(&[0xff, 0xfe], None, &utf8_only).is_err());

        let broader = vec!["utf-8".to_string(), "latin-1".to_string()];
        assert!(validate_encoding(&[0xff, 0xfe], None, &broader).is_ok());

        assert!(validate_encoding(&[0xff, 0xfe], None, &[]).is_ok());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn local_paths_are_read_directly() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[]").unwrap();
        let fetcher = ContentFetcher::new(FetchConfig::default()).unwrap();
        let page = fetcher
            .fetch_page(file.path().to_str().unwrap(), 1)
            .await
            .unwrap();
        assert_eq!(page, Page::Content(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn missing_local_path_is_a_distinct_error() {
        let fetcher = ContentFetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher
            .fetch_page("/no/such/file.json", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::LocalFile { .. }));
    }

    #[tokio::test]
    async fn oversized_local_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![b'x'; 64]).unwrap();
        let fetcher = ContentFetcher::new(FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        })
        .unwrap();
        let err = fetcher
            .fetch_page(file.path().to_str().unwrap(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));
    }
}
