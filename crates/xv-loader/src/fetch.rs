//! Resource fetching seam: network, local files, and an in-memory table for tests.

use crate::error::LoadError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use xv_core::XvError;
use xv_core::XvResult;
use xv_net::NetStack;
use xv_net::XML_ACCEPT_HEADER;
use xv_net::decode_text;
use xv_net::url::FetchUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Document,
    Stylesheet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub text: String,
}

impl FetchedResource {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, kind: ResourceKind) -> XvResult<FetchedResource>;
}

/// Fetches and turns transport errors and non-2xx statuses into [`LoadError::FetchFailure`].
pub(crate) async fn fetch_checked(
    fetcher: &dyn Fetcher,
    url: &Url,
    kind: ResourceKind,
) -> Result<FetchedResource, LoadError> {
    let resource = fetcher
        .fetch(url, kind)
        .await
        .map_err(|source| LoadError::FetchFailure {
            url: url.to_string(),
            status: None,
            source,
        })?;
    if !resource.is_success() {
        return Err(LoadError::FetchFailure {
            url: url.to_string(),
            status: Some(resource.status),
            source: XvError::new(
                "loader.fetch.status",
                format!("HTTP {} for {}", resource.status, resource.url),
            ),
        });
    }
    Ok(resource)
}

/// `http`/`https` through [`NetStack`] on the blocking pool, `file` through `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct NetFetcher {
    stack: Arc<NetStack>,
}

impl NetFetcher {
    pub fn new(stack: NetStack) -> Self {
        Self {
            stack: Arc::new(stack),
        }
    }

    async fn fetch_file(url: &Url) -> XvResult<FetchedResource> {
        let path = url.to_file_path().map_err(|()| {
            XvError::new(
                "loader.fetch.file_path_invalid",
                format!("{url} does not name a local file"),
            )
        })?;
        let bytes = tokio::fs::read(&path).await.map_err(|error| {
            XvError::new(
                "loader.fetch.file_read_failed",
                format!("failed to read {}: {error}", path.display()),
            )
        })?;
        Ok(FetchedResource {
            url: url.clone(),
            status: 200,
            content_type: String::new(),
            text: decode_text(&bytes, ""),
        })
    }
}

#[async_trait]
impl Fetcher for NetFetcher {
    async fn fetch(&self, url: &Url, kind: ResourceKind) -> XvResult<FetchedResource> {
        tracing::debug!(url = url.as_str(), ?kind, "fetch");
        match url.scheme() {
            "file" => return Self::fetch_file(url).await,
            "http" | "https" => {}
            other => {
                return Err(XvError::new(
                    "loader.fetch.scheme_unsupported",
                    format!("cannot fetch `{other}:` URLs"),
                ));
            }
        }

        let target = FetchUrl::from_url(url.clone())?;
        let stack = Arc::clone(&self.stack);
        let fetched = tokio::task::spawn_blocking(move || stack.fetch(&target, XML_ACCEPT_HEADER))
            .await
            .map_err(|error| {
                XvError::new(
                    "loader.fetch.join_failed",
                    format!("fetch task for {url} did not complete: {error}"),
                )
            })??;

        Ok(FetchedResource {
            url: fetched.final_url.as_url().clone(),
            status: fetched.status.as_u16(),
            text: decode_text(&fetched.body, &fetched.content_type),
            content_type: fetched.content_type,
        })
    }
}

#[derive(Debug, Clone)]
struct StaticEntry {
    status: u16,
    content_type: String,
    body: String,
    delays: VecDeque<Duration>,
}

/// In-memory responses keyed by absolute URL; records every request.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    entries: Mutex<HashMap<String, StaticEntry>>,
    requests: Mutex<Vec<(Url, ResourceKind)>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, content_type: &str, body: impl Into<String>) {
        self.insert_with_status(url, 200, content_type, body);
    }

    pub fn insert_with_status(&self, url: &str, status: u16, content_type: &str, body: impl Into<String>) {
        let mut entries = lock(&self.entries);
        let delays = entries
            .remove(url)
            .map(|previous| previous.delays)
            .unwrap_or_default();
        entries.insert(
            url.to_owned(),
            StaticEntry {
                status,
                content_type: content_type.to_owned(),
                body: body.into(),
                delays,
            },
        );
    }

    /// Delays for the next requests of `url`, consumed one per request.
    pub fn delay_next(&self, url: &str, delays: &[Duration]) {
        if let Some(entry) = lock(&self.entries).get_mut(url) {
            entry.delays.extend(delays.iter().copied());
        }
    }

    pub fn requests(&self) -> Vec<(Url, ResourceKind)> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &Url, kind: ResourceKind) -> XvResult<FetchedResource> {
        lock(&self.requests).push((url.clone(), kind));

        // The body is captured at request time; the delay models a slow response.
        let (resource, delay) = {
            let mut entries = lock(&self.entries);
            let entry = entries.get_mut(url.as_str()).ok_or_else(|| {
                XvError::new(
                    "loader.fetch.connect_failed",
                    format!("no route to {url}"),
                )
            })?;
            let resource = FetchedResource {
                url: url.clone(),
                status: entry.status,
                content_type: entry.content_type.clone(),
                text: entry.body.clone(),
            };
            (resource, entry.delays.pop_front())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(resource)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::Fetcher;
    use super::ResourceKind;
    use super::StaticFetcher;
    use super::fetch_checked;
    use crate::error::LoadError;
    use url::Url;

    fn url(raw: &str) -> Url {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        }
    }

    #[tokio::test]
    async fn static_fetcher_serves_and_records() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://example.com/a.xml", "text/xml", "<a/>");

        let resource = match fetcher.fetch(&url("https://example.com/a.xml"), ResourceKind::Document).await {
            Ok(resource) => resource,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(resource.text, "<a/>");
        assert!(fetcher.fetch(&url("https://example.com/b.xml"), ResourceKind::Stylesheet).await.is_err());
        assert_eq!(
            fetcher.requests(),
            vec![
                (url("https://example.com/a.xml"), ResourceKind::Document),
                (url("https://example.com/b.xml"), ResourceKind::Stylesheet),
            ]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_failure() {
        let fetcher = StaticFetcher::new();
        fetcher.insert_with_status("https://example.com/gone.xml", 404, "text/html", "nope");

        let result = fetch_checked(&fetcher, &url("https://example.com/gone.xml"), ResourceKind::Document).await;
        match result {
            Err(LoadError::FetchFailure { status, .. }) => assert_eq!(status, Some(404)),
            other => panic!("unexpected {other:?}"),
        }

        let result = fetch_checked(&fetcher, &url("https://example.com/none.xml"), ResourceKind::Document).await;
        match result {
            Err(LoadError::FetchFailure { status, source, .. }) => {
                assert_eq!(status, None);
                assert_eq!(source.code, "loader.fetch.connect_failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn net_fetcher_reads_file_urls() {
        let path = std::env::temp_dir().join(format!("xslview-fetch-{}.xml", std::process::id()));
        if let Err(error) = std::fs::write(&path, "<?xml-stylesheet href='a.xsl'?><a/>") {
            panic!("{error}");
        }
        let file_url = match Url::from_file_path(&path) {
            Ok(url) => url,
            Err(()) => panic!("temp path is not absolute"),
        };

        let fetcher = super::NetFetcher::default();
        let resource = match fetcher.fetch(&file_url, ResourceKind::Document).await {
            Ok(resource) => resource,
            Err(error) => panic!("{error}"),
        };
        assert!(resource.text.ends_with("<a/>"));
        let _ = std::fs::remove_file(&path);

        let unsupported = fetcher.fetch(&url("ftp://example.com/a.xml"), ResourceKind::Document).await;
        if let Err(error) = unsupported {
            assert_eq!(error.code, "loader.fetch.scheme_unsupported");
        } else {
            panic!("expected unsupported scheme");
        }
    }
}
