//! Fetched XML documents and their stylesheet reference.

use crate::error::LoadError;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const STYLESHEET_TARGET: &str = "xml-stylesheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    /// Final URL after redirects; relative stylesheet hrefs resolve against it.
    pub url: Url,
    pub text: String,
}

impl XmlDocument {
    pub fn new(url: Url, text: impl Into<String>) -> Self {
        Self {
            url,
            text: text.into(),
        }
    }

    pub fn parse(&self) -> Result<roxmltree::Document<'_>, LoadError> {
        roxmltree::Document::parse_with_options(
            &self.text,
            roxmltree::ParsingOptions {
                allow_dtd: true,
                ..roxmltree::ParsingOptions::default()
            },
        )
        .map_err(|error| LoadError::InvalidDocument {
            url: self.url.to_string(),
            detail: error.to_string(),
        })
    }
}

fn href_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"href\s*=\s*(?:'([^']*)'|"([^"]*)")"#).ok())
        .as_ref()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StylesheetResolver;

impl StylesheetResolver {
    /// Stylesheet URL named by the document's leading `xml-stylesheet` instruction.
    pub fn resolve(&self, document: &XmlDocument) -> Result<Url, LoadError> {
        let parsed = document.parse()?;
        let missing = || LoadError::MissingStylesheet {
            url: document.url.to_string(),
        };

        let first = parsed.root().first_child().ok_or_else(missing)?;
        let instruction = first
            .pi()
            .filter(|pi| pi.target == STYLESHEET_TARGET)
            .ok_or_else(missing)?;

        let data = instruction.value.unwrap_or_default();
        let href = href_pattern()
            .and_then(|pattern| pattern.captures(data))
            .and_then(|captures| captures.get(1).or_else(|| captures.get(2)))
            .map(|found| found.as_str())
            .filter(|href| !href.trim().is_empty())
            .ok_or_else(|| LoadError::MalformedStylesheetReference {
                url: document.url.to_string(),
                detail: format!("no href in `{data}`"),
            })?;

        document
            .url
            .join(href.trim())
            .map_err(|error| LoadError::MalformedStylesheetReference {
                url: document.url.to_string(),
                detail: format!("href `{href}` is not a valid URL: {error}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::StylesheetResolver;
    use super::XmlDocument;
    use crate::error::LoadErrorKind;
    use url::Url;

    fn document(text: &str) -> XmlDocument {
        let url = match Url::parse("https://status.example.com/data/nodes.xml") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        XmlDocument::new(url, text)
    }

    #[test]
    fn resolves_relative_href_against_document_url() {
        let doc = document(
            "<?xml version='1.0'?>\n<?xml-stylesheet type='text/xsl' href='/ui/index.xsl'?>\n<nodes/>",
        );
        let resolved = match StylesheetResolver.resolve(&doc) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(resolved.as_str(), "https://status.example.com/ui/index.xsl");

        let sibling = document("<?xml-stylesheet href='view.xsl'?><nodes/>");
        let resolved = match StylesheetResolver.resolve(&sibling) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(resolved.as_str(), "https://status.example.com/data/view.xsl");
    }

    #[test]
    fn double_quoted_href_is_accepted() {
        let doc = document("<?xml-stylesheet type=\"text/xsl\" href=\"https://cdn.example.com/a.xsl\"?><a/>");
        assert!(StylesheetResolver.resolve(&doc).is_ok());
    }

    #[test]
    fn first_node_must_be_the_instruction() {
        let cases = [
            "<nodes/>",
            "<!-- generated --><?xml-stylesheet href='a.xsl'?><nodes/>",
            "<?other href='a.xsl'?><nodes/>",
        ];
        for text in cases {
            let result = StylesheetResolver.resolve(&document(text));
            if let Err(error) = result {
                assert_eq!(error.kind(), LoadErrorKind::MissingStylesheet);
            } else {
                panic!("expected missing stylesheet for {text}");
            }
        }
    }

    #[test]
    fn malformed_and_invalid_documents() {
        let result = StylesheetResolver.resolve(&document("<?xml-stylesheet type='text/xsl'?><a/>"));
        if let Err(error) = result {
            assert_eq!(error.kind(), LoadErrorKind::MalformedStylesheetReference);
        } else {
            panic!("expected malformed reference");
        }

        let result = StylesheetResolver.resolve(&document("<a><b></a>"));
        if let Err(error) = result {
            assert_eq!(error.kind(), LoadErrorKind::InvalidDocument);
        } else {
            panic!("expected invalid document");
        }
    }
}
