//! Rewrites raw epoch-seconds holders into readable date/time text.

use chrono::DateTime;
use chrono::Local;
use chrono::Utc;
use xv_core::XvResult;
use xv_dom::Document;
use xv_dom::NodeId;
use xv_dom::Selector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormatter {
    pub tag: String,
    pub id: String,
    pub attribute: String,
    pub format: String,
    pub utc: bool,
}

impl Default for TimestampFormatter {
    fn default() -> Self {
        Self {
            tag: "span".to_owned(),
            id: "convert-timestamp".to_owned(),
            attribute: "timestamp".to_owned(),
            format: "%-m/%-d/%Y, %-I:%M:%S %p".to_owned(),
            utc: false,
        }
    }
}

impl TimestampFormatter {
    fn selector(&self) -> Selector {
        Selector::tag(&self.tag)
            .with_id(&self.id)
            .with_attr(&self.attribute)
    }

    /// Seconds since the Unix epoch, fractional values allowed.
    pub fn format_epoch(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let millis = match raw.parse::<i64>() {
            Ok(secs) => secs.checked_mul(1000)?,
            Err(_) => {
                let secs = raw.parse::<f64>().ok().filter(|secs| secs.is_finite())?;
                (secs * 1000.0).round() as i64
            }
        };
        let instant = DateTime::<Utc>::from_timestamp_millis(millis)?;
        let text = if self.utc {
            instant.format(&self.format).to_string()
        } else {
            instant.with_timezone(&Local).format(&self.format).to_string()
        };
        Some(text)
    }

    /// Formats every holder inside `scope`; the raw attribute is left in place.
    ///
    /// Returns the number of holders rewritten.
    pub fn apply(&self, doc: &mut Document, scope: NodeId) -> XvResult<usize> {
        let mut rewritten = 0_usize;
        for holder in doc.select(scope, &self.selector()) {
            let raw = doc.attr(holder, &self.attribute).unwrap_or_default().to_owned();
            match self.format_epoch(&raw) {
                Some(text) => {
                    doc.set_text(holder, &text)?;
                    rewritten += 1;
                }
                None => {
                    tracing::warn!(node = holder, value = raw.as_str(), "timestamp is not epoch seconds");
                }
            }
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::TimestampFormatter;
    use xv_html::HtmlParser;

    fn utc() -> TimestampFormatter {
        TimestampFormatter {
            utc: true,
            ..TimestampFormatter::default()
        }
    }

    #[test]
    fn epoch_zero_formats_as_1970() {
        assert_eq!(utc().format_epoch("0").as_deref(), Some("1/1/1970, 12:00:00 AM"));
        assert_eq!(
            utc().format_epoch("1700000000").as_deref(),
            Some("11/14/2023, 10:13:20 PM")
        );
        assert_eq!(utc().format_epoch("1.5").as_deref(), Some("1/1/1970, 12:00:01 AM"));

        let local = match TimestampFormatter::default().format_epoch("0") {
            Some(text) => text,
            None => panic!("epoch zero must format"),
        };
        assert!(!local.is_empty());
        assert_ne!(local, "0");
    }

    #[test]
    fn apply_rewrites_holders_in_scope_only() {
        let mut doc = HtmlParser.parse(
            "<div id=\"a\"><span id=\"convert-timestamp\" timestamp=\"0\">0</span></div>\
             <div id=\"b\"><span id=\"convert-timestamp\" timestamp=\"0\">0</span>\
             <span id=\"convert-timestamp\" timestamp=\"soon\">soon</span></div>",
        );
        let Some(scope) = doc.element_by_id("b") else {
            panic!("scope missing");
        };
        let rewritten = match utc().apply(&mut doc, scope) {
            Ok(count) => count,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(rewritten, 1);
        assert_eq!(
            doc.to_html(),
            "<div id=\"a\"><span id=\"convert-timestamp\" timestamp=\"0\">0</span></div>\
             <div id=\"b\"><span id=\"convert-timestamp\" timestamp=\"0\">1/1/1970, 12:00:00 AM</span>\
             <span id=\"convert-timestamp\" timestamp=\"soon\">soon</span></div>"
        );
    }

    #[test]
    fn applying_twice_is_stable() {
        let mut doc = HtmlParser.parse("<span id=\"convert-timestamp\" timestamp=\"86400\"></span>");
        let root = doc.root();
        assert!(utc().apply(&mut doc, root).is_ok());
        let once = doc.to_html();
        assert!(utc().apply(&mut doc, root).is_ok());
        assert_eq!(doc.to_html(), once);
        assert!(once.contains("1/2/1970, 12:00:00 AM"));
    }
}
