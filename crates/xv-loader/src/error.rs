//! Load pipeline failures.

use xv_core::XvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
    MissingStylesheet,
    MalformedStylesheetReference,
    InvalidDocument,
    FetchFailure,
    TransformFailure,
    SwapFailure,
}

impl LoadErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingStylesheet => "missing_stylesheet",
            Self::MalformedStylesheetReference => "malformed_stylesheet_reference",
            Self::InvalidDocument => "invalid_document",
            Self::FetchFailure => "fetch_failure",
            Self::TransformFailure => "transform_failure",
            Self::SwapFailure => "swap_failure",
        }
    }
}

/// Every way a fetch, resolve, transform cycle can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The document's first node is not an `xml-stylesheet` instruction.
    #[error("{url} does not start with an xml-stylesheet processing instruction")]
    MissingStylesheet { url: String },

    #[error("xml-stylesheet instruction in {url} has no usable href: {detail}")]
    MalformedStylesheetReference { url: String, detail: String },

    #[error("{url} is not well-formed XML: {detail}")]
    InvalidDocument { url: String, detail: String },

    /// Transport error, or a response outside 2xx (`status` is then set).
    #[error("fetching {url} failed: {source}")]
    FetchFailure {
        url: String,
        status: Option<u16>,
        #[source]
        source: XvError,
    },

    #[error("transform with {stylesheet} failed: {source}")]
    TransformFailure {
        stylesheet: String,
        #[source]
        source: XvError,
    },

    /// The rendered content could not be placed into the page.
    #[error("placing content from {url} into the page failed: {source}")]
    SwapFailure {
        url: String,
        #[source]
        source: XvError,
    },
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            Self::MissingStylesheet { .. } => LoadErrorKind::MissingStylesheet,
            Self::MalformedStylesheetReference { .. } => {
                LoadErrorKind::MalformedStylesheetReference
            }
            Self::InvalidDocument { .. } => LoadErrorKind::InvalidDocument,
            Self::FetchFailure { .. } => LoadErrorKind::FetchFailure,
            Self::TransformFailure { .. } => LoadErrorKind::TransformFailure,
            Self::SwapFailure { .. } => LoadErrorKind::SwapFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LoadError;
    use super::LoadErrorKind;
    use xv_core::XvError;

    #[test]
    fn fetch_failure_keeps_status_and_source() {
        let error = LoadError::FetchFailure {
            url: "https://example.com/a.xml".to_owned(),
            status: Some(404),
            source: XvError::new("loader.fetch.status", "HTTP 404"),
        };
        assert_eq!(error.kind(), LoadErrorKind::FetchFailure);
        assert_eq!(
            error.to_string(),
            "fetching https://example.com/a.xml failed: loader.fetch.status: HTTP 404"
        );
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn kinds_have_stable_names() {
        let error = LoadError::MissingStylesheet {
            url: "a.xml".to_owned(),
        };
        assert_eq!(error.kind().as_str(), "missing_stylesheet");
    }
}
