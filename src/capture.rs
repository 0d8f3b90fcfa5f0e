use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use url::Url;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const FETCH_TIMEOUT_SECS: u64 = 10;

/// Handle to the page a submission refers to. Fields are optional because
/// the host may hand us a tab with no id (detached devtools) or no URL
/// (privileged pages).
#[derive(Debug, Clone, Default)]
pub struct TabRef {
    pub id: Option<i64>,
    pub url: Option<Url>,
    pub title: Option<String>,
}

impl TabRef {
    pub fn new(id: i64, url: Url) -> Self {
        Self {
            id: Some(id),
            url: Some(url),
            title: None,
        }
    }
}

/// Reads the rendered markup of a tab's page. `None` means the page cannot
/// be read at all; errors are reserved for transport failures.
#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, tab: &TabRef) -> anyhow::Result<Option<String>>;
}

/// Capture backend that re-fetches the page over HTTP. Stands in for
/// in-page serialization when running outside a browser.
pub struct HttpPageCapture {
    http: reqwest::Client,
}

impl HttpPageCapture {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build capture http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageCapture for HttpPageCapture {
    async fn capture(&self, tab: &TabRef) -> anyhow::Result<Option<String>> {
        let Some(url) = &tab.url else {
            return Ok(None);
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Ok(None);
        }

        let resp = self
            .http
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, "minimealie/0.1")
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let html = read_text_limited(resp, MAX_BODY_BYTES).await?;
        Ok(Some(html))
    }
}

async fn read_text_limited(mut resp: reqwest::Response, limit: usize) -> anyhow::Result<String> {
    let mut out: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await.context("read response chunk")? {
        if out.len() + chunk.len() > limit {
            let remaining = limit.saturating_sub(out.len());
            out.extend_from_slice(&chunk[..remaining]);
            break;
        }
        out.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tab_without_url_captures_nothing() {
        let capture = HttpPageCapture::new().unwrap();
        let tab = TabRef {
            id: Some(1),
            url: None,
            title: None,
        };
        assert!(capture.capture(&tab).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn privileged_scheme_captures_nothing() {
        let capture = HttpPageCapture::new().unwrap();
        let tab = TabRef::new(1, Url::parse("chrome://settings").unwrap());
        assert!(capture.capture(&tab).await.unwrap().is_none());
    }
}
