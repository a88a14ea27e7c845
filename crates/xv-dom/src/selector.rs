//! Compound simple selectors (`tag#id.class[attr]`).

use core::fmt;
use core::str::FromStr;
use xv_core::XvError;
use xv_core::XvResult;

/// Attribute constraint inside a selector: presence, or exact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMatch {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrMatch>,
}

impl Selector {
    pub fn tag(name: &str) -> Self {
        Self {
            tag: Some(name.to_ascii_lowercase()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_owned());
        self
    }

    pub fn with_attr(mut self, name: &str) -> Self {
        self.attrs.push(AttrMatch {
            name: name.to_ascii_lowercase(),
            value: None,
        });
        self
    }

    pub fn parse(input: &str) -> XvResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(XvError::new("dom.selector.empty", "selector is empty"));
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut selector = Self::default();
        let mut idx = 0_usize;

        if chars[0] != '*' && is_ident_char(chars[0]) {
            let (name, next) = read_ident(&chars, 0);
            selector.tag = Some(name.to_ascii_lowercase());
            idx = next;
        } else if chars[0] == '*' {
            idx = 1;
        }

        while idx < chars.len() {
            match chars[idx] {
                '#' => {
                    let (name, next) = read_ident(&chars, idx + 1);
                    if name.is_empty() {
                        return Err(invalid(trimmed, "empty id"));
                    }
                    selector.id = Some(name);
                    idx = next;
                }
                '.' => {
                    let (name, next) = read_ident(&chars, idx + 1);
                    if name.is_empty() {
                        return Err(invalid(trimmed, "empty class"));
                    }
                    selector.classes.push(name);
                    idx = next;
                }
                '[' => {
                    let close = chars[idx..]
                        .iter()
                        .position(|ch| *ch == ']')
                        .map(|offset| idx + offset)
                        .ok_or_else(|| invalid(trimmed, "unterminated attribute"))?;
                    let body: String = chars[idx + 1..close].iter().collect();
                    selector.attrs.push(parse_attr_match(trimmed, &body)?);
                    idx = close + 1;
                }
                other => {
                    return Err(invalid(trimmed, &format!("unexpected `{other}`")));
                }
            }
        }

        Ok(selector)
    }
}

impl FromStr for Selector {
    type Err = XvError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{tag}")?,
            None if self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty() => {
                write!(f, "*")?;
            }
            None => {}
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        for attr in &self.attrs {
            match &attr.value {
                Some(value) => write!(f, "[{}='{value}']", attr.name)?,
                None => write!(f, "[{}]", attr.name)?,
            }
        }
        Ok(())
    }
}

fn parse_attr_match(selector: &str, body: &str) -> XvResult<AttrMatch> {
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
                .or_else(|| {
                    value
                        .strip_prefix('"')
                        .and_then(|rest| rest.strip_suffix('"'))
                })
                .unwrap_or(value);
            (name.trim(), Some(value.to_owned()))
        }
        None => (body.trim(), None),
    };

    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(invalid(selector, "invalid attribute name"));
    }

    Ok(AttrMatch {
        name: name.to_ascii_lowercase(),
        value,
    })
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut idx = start;
    while idx < chars.len() && is_ident_char(chars[idx]) {
        idx += 1;
    }
    (chars[start..idx].iter().collect(), idx)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '-' | '_' | ':')
}

fn invalid(selector: &str, detail: &str) -> XvError {
    XvError::new(
        "dom.selector.invalid",
        format!("invalid selector `{selector}`: {detail}"),
    )
}

#[cfg(test)]
mod tests {
    use super::Selector;

    #[test]
    fn parses_compound_selector() {
        let selector = match Selector::parse("span#convert-timestamp.raw[timestamp]") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(selector.tag.as_deref(), Some("span"));
        assert_eq!(selector.id.as_deref(), Some("convert-timestamp"));
        assert_eq!(selector.classes, vec!["raw".to_owned()]);
        assert_eq!(selector.attrs.len(), 1);
        assert_eq!(selector.to_string(), "span#convert-timestamp.raw[timestamp]");
    }

    #[test]
    fn parses_attribute_with_value() {
        let selector = match Selector::parse("div[load='/a.xml']") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(selector.attrs[0].name, "load");
        assert_eq!(selector.attrs[0].value.as_deref(), Some("/a.xml"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("div > p").is_err());
        assert!(Selector::parse("div[load").is_err());
        assert!(Selector::parse("#").is_err());
    }
}
