//! Stylesheet fetch, compile and apply.

use crate::document::StylesheetResolver;
use crate::document::XmlDocument;
use crate::error::LoadError;
use crate::fetch::Fetcher;
use crate::fetch::ResourceKind;
use crate::fetch::fetch_checked;
use moka::future::Cache;
use std::sync::Arc;
use url::Url;
use xv_dom::Fragment;
use xv_xslt::Stylesheet;

#[derive(Debug, Clone)]
struct CachedStylesheet {
    source: Arc<str>,
    compiled: Arc<Stylesheet>,
}

/// Compiled stylesheets keyed by URL.
///
/// An entry is only reused while the fetched stylesheet text is unchanged, so
/// caching never alters rendered output.
#[derive(Debug, Clone)]
pub struct StylesheetCache {
    inner: Cache<String, CachedStylesheet>,
}

impl StylesheetCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    async fn get(&self, url: &Url, source: &str) -> Option<Arc<Stylesheet>> {
        self.inner
            .get(url.as_str())
            .await
            .filter(|cached| &*cached.source == source)
            .map(|cached| cached.compiled)
    }

    async fn insert(&self, url: &Url, source: &str, compiled: Arc<Stylesheet>) {
        self.inner
            .insert(
                url.to_string(),
                CachedStylesheet {
                    source: Arc::from(source),
                    compiled,
                },
            )
            .await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

/// Result of one fetch, resolve, transform cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub document_url: Url,
    pub stylesheet_url: Url,
    pub fragment: Fragment,
}

#[derive(Clone)]
pub struct TransformEngine {
    fetcher: Arc<dyn Fetcher>,
    resolver: StylesheetResolver,
    cache: Option<StylesheetCache>,
}

impl std::fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformEngine")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TransformEngine {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            resolver: StylesheetResolver,
            cache: None,
        }
    }

    pub fn with_cache(mut self, max_capacity: u64) -> Self {
        self.cache = Some(StylesheetCache::new(max_capacity));
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub async fn fetch_document(&self, url: &Url) -> Result<XmlDocument, LoadError> {
        let resource = fetch_checked(self.fetcher.as_ref(), url, ResourceKind::Document).await?;
        Ok(XmlDocument::new(resource.url, resource.text))
    }

    /// Fetches and compiles the stylesheet at `url`, reusing a cached compile when enabled.
    pub async fn stylesheet(&self, url: &Url) -> Result<Arc<Stylesheet>, LoadError> {
        let resource = fetch_checked(self.fetcher.as_ref(), url, ResourceKind::Stylesheet).await?;

        if let Some(cache) = &self.cache {
            if let Some(compiled) = cache.get(url, &resource.text).await {
                tracing::debug!(url = url.as_str(), "stylesheet cache hit");
                return Ok(compiled);
            }
        }

        let compiled = Stylesheet::compile(&resource.text)
            .map(Arc::new)
            .map_err(|source| LoadError::TransformFailure {
                stylesheet: url.to_string(),
                source,
            })?;
        if let Some(cache) = &self.cache {
            cache.insert(url, &resource.text, Arc::clone(&compiled)).await;
        }
        Ok(compiled)
    }

    pub async fn transform(&self, document: &XmlDocument, stylesheet_url: &Url) -> Result<Fragment, LoadError> {
        let stylesheet = self.stylesheet(stylesheet_url).await?;
        stylesheet
            .transform(&document.text)
            .map_err(|source| LoadError::TransformFailure {
                stylesheet: stylesheet_url.to_string(),
                source,
            })
    }

    /// Fetch the document, resolve its stylesheet, then transform.
    pub async fn render(&self, url: &Url) -> Result<Rendered, LoadError> {
        let document = self.fetch_document(url).await?;
        tracing::debug!(url = url.as_str(), bytes = document.text.len(), "document fetched");

        let stylesheet_url = self.resolver.resolve(&document)?;
        tracing::debug!(stylesheet = stylesheet_url.as_str(), "stylesheet resolved");

        let fragment = self.transform(&document, &stylesheet_url).await?;
        Ok(Rendered {
            document_url: document.url,
            stylesheet_url,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::TransformEngine;
    use crate::document::XmlDocument;
    use crate::error::LoadErrorKind;
    use crate::fetch::ResourceKind;
    use crate::fetch::StaticFetcher;
    use std::sync::Arc;
    use url::Url;

    const XSL: &str = "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\">\
        <xsl:template match=\"/status\"><p><xsl:value-of select=\"@state\"/></p></xsl:template>\
        </xsl:stylesheet>";

    fn url(raw: &str) -> Url {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        }
    }

    fn fixture() -> Arc<StaticFetcher> {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(
            "https://example.com/data/status.xml",
            "text/xml",
            "<?xml-stylesheet type='text/xsl' href='../ui/status.xsl'?><status state=\"green\"/>",
        );
        fetcher.insert("https://example.com/ui/status.xsl", "text/xsl", XSL);
        fetcher
    }

    #[tokio::test]
    async fn renders_document_through_its_stylesheet() {
        let fetcher = fixture();
        let engine = TransformEngine::new(fetcher.clone());

        let rendered = match engine.render(&url("https://example.com/data/status.xml")).await {
            Ok(rendered) => rendered,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(rendered.fragment.to_html(), "<p>green</p>");
        assert_eq!(rendered.stylesheet_url.as_str(), "https://example.com/ui/status.xsl");
        let kinds: Vec<ResourceKind> = fetcher.requests().into_iter().map(|(_, kind)| kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Document, ResourceKind::Stylesheet]);
    }

    #[tokio::test]
    async fn cache_is_bypassed_when_stylesheet_changes() {
        let fetcher = fixture();
        let engine = TransformEngine::new(fetcher.clone()).with_cache(8);
        let doc = XmlDocument::new(url("https://example.com/data/status.xml"), "<status state=\"red\"/>");
        let sheet_url = url("https://example.com/ui/status.xsl");

        let first = match engine.transform(&doc, &sheet_url).await {
            Ok(fragment) => fragment,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(first.to_html(), "<p>red</p>");

        fetcher.insert(
            "https://example.com/ui/status.xsl",
            "text/xsl",
            XSL.replace("<p>", "<em>").replace("</p>", "</em>"),
        );
        let second = match engine.transform(&doc, &sheet_url).await {
            Ok(fragment) => fragment,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(second.to_html(), "<em>red</em>");
    }

    #[tokio::test]
    async fn compile_and_fetch_failures_are_typed() {
        let fetcher = fixture();
        fetcher.insert("https://example.com/ui/broken.xsl", "text/xsl", "<xsl:stylesheet");
        let engine = TransformEngine::new(fetcher);
        let doc = XmlDocument::new(url("https://example.com/data/status.xml"), "<status/>");

        let result = engine.transform(&doc, &url("https://example.com/ui/broken.xsl")).await;
        if let Err(error) = result {
            assert_eq!(error.kind(), LoadErrorKind::TransformFailure);
        } else {
            panic!("expected transform failure");
        }

        let result = engine.render(&url("https://example.com/data/missing.xml")).await;
        if let Err(error) = result {
            assert_eq!(error.kind(), LoadErrorKind::FetchFailure);
        } else {
            panic!("expected fetch failure");
        }
    }
}
