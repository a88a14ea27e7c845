//! Host page HTML tokenization and tree building.

use xv_dom::DOCUMENT_NODE;
use xv_dom::Document;
use xv_dom::NodeId;
use xv_dom::serialize::is_raw_text_element;
use xv_dom::serialize::is_void_element;

/// Parses raw HTML into a DOM document.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse(&self, input: &str) -> Document {
        let mut doc = Document::empty();
        build_tree(&mut doc, tokenize(input));
        doc.title = find_title(&doc);
        doc
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(String),
    Comment(String),
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let bytes = source.as_bytes();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        if starts_with(bytes, idx, b"<!--") {
            let (body, next) = read_comment(source, idx);
            out.push(Token::Comment(body.to_owned()));
            idx = next;
            continue;
        }

        if bytes[idx] == b'<' {
            if starts_with(bytes, idx, b"</") {
                if let Some((token, next)) = parse_end_tag(bytes, idx) {
                    out.push(token);
                    idx = next;
                    continue;
                }
            } else if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
                idx = skip_to_gt(bytes, idx.saturating_add(2));
                continue;
            } else if let Some((token, next)) = parse_start_tag(bytes, idx) {
                let raw_text_tag = match &token {
                    Token::Start {
                        name, self_closing, ..
                    } if !*self_closing && is_raw_text_element(name) => Some(name.clone()),
                    _ => None,
                };

                out.push(token);
                idx = next;

                if let Some(tag_name) = raw_text_tag {
                    let (raw_text, closing_end) = read_raw_text(source, idx, &tag_name);
                    if !raw_text.is_empty() {
                        out.push(Token::Text(raw_text.to_owned()));
                    }
                    out.push(Token::End { name: tag_name });
                    idx = closing_end;
                }
                continue;
            }
        }

        // A stray '<' that opens no tag is literal text.
        let next = find_byte(bytes, idx.saturating_add(1), b'<').unwrap_or(bytes.len());
        push_text(&mut out, &source[idx..next]);
        idx = next;
    }

    out
}

fn push_text(out: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Token::Text(previous)) = out.last_mut() {
        previous.push_str(text);
        return;
    }
    out.push(Token::Text(text.to_owned()));
}

fn build_tree(doc: &mut Document, tokens: Vec<Token>) {
    let mut stack: Vec<(String, NodeId)> = vec![(String::new(), DOCUMENT_NODE)];

    for token in tokens {
        let parent = stack.last().map(|(_, id)| *id).unwrap_or(DOCUMENT_NODE);
        match token {
            Token::Text(text) => {
                let raw = stack
                    .last()
                    .is_some_and(|(tag, _)| is_raw_text_element(tag));
                let value = if raw { text } else { decode_entities(&text) };
                let node = doc.create_text(&value);
                let _ = doc.append_child(parent, node);
            }
            Token::Comment(text) => {
                let node = doc.create_comment(&text);
                let _ = doc.append_child(parent, node);
            }
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                let node = doc.create_element_with_attrs(&name, attrs);
                let _ = doc.append_child(parent, node);
                if !self_closing && !is_void_element(&name) {
                    stack.push((name, node));
                }
            }
            Token::End { name } => {
                // Unmatched end tags are dropped; matched ones close everything above.
                if let Some(position) = stack.iter().rposition(|(tag, _)| *tag == name) {
                    if position > 0 {
                        stack.truncate(position);
                    }
                }
            }
        }
    }
}

fn find_title(doc: &Document) -> String {
    doc.descendants(DOCUMENT_NODE)
        .into_iter()
        .find(|node| doc.tag_name(*node) == Some("title"))
        .map(|node| collapse_whitespace(&doc.text_content(node)))
        .unwrap_or_default()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0_usize;

    while let Some(rel_amp) = input[cursor..].find('&') {
        let amp = cursor + rel_amp;
        out.push_str(&input[cursor..amp]);

        let rest = &input[(amp + 1)..];
        let decoded = rest
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&rest[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                cursor = amp + semi + 2;
            }
            None => {
                out.push('&');
                cursor = amp + 1;
            }
        }
    }

    out.push_str(&input[cursor..]);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "nbsp" => Some('\u{a0}'),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "copy" => Some('\u{a9}'),
        "ndash" => Some('\u{2013}'),
        "mdash" => Some('\u{2014}'),
        "hellip" => Some('\u{2026}'),
        _ => {
            let value = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(value)
        }
    }
}

fn read_comment(source: &str, start: usize) -> (&str, usize) {
    let body_start = start.saturating_add(4);
    match find_subslice(source.as_bytes(), body_start, b"-->") {
        Some(end) => (&source[body_start..end], end.saturating_add(3)),
        None => (source.get(body_start..).unwrap_or(""), source.len()),
    }
}

fn read_raw_text<'a>(source: &'a str, start: usize, tag_name: &str) -> (&'a str, usize) {
    let bytes = source.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
        {
            if let Some((_, end)) = parse_end_tag(bytes, idx) {
                return (&source[start..idx], end);
            }
        }
        idx = idx.saturating_add(1);
    }

    (&source[start..], bytes.len())
}

fn parse_end_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut idx = skip_spaces(bytes, start.saturating_add(2));
    let begin = idx;
    while idx < bytes.len() && is_name_char(bytes[idx]) {
        idx += 1;
    }
    if idx == begin {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..idx]).to_ascii_lowercase();
    let end = find_byte(bytes, idx, b'>')?;
    Some((Token::End { name }, end + 1))
}

fn parse_start_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut idx = start + 1;
    let begin = idx;
    while idx < bytes.len() && is_name_char(bytes[idx]) {
        idx += 1;
    }
    if idx == begin || !bytes[begin].is_ascii_alphabetic() {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..idx]).to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        idx = skip_spaces(bytes, idx);
        let byte = *bytes.get(idx)?;

        if byte == b'>' {
            idx += 1;
            break;
        }

        if byte == b'/' {
            idx = skip_spaces(bytes, idx + 1);
            if bytes.get(idx).copied() == Some(b'>') {
                self_closing = true;
                idx += 1;
                break;
            }
            continue;
        }

        let attr_start = idx;
        while idx < bytes.len() && is_attr_name_char(bytes[idx]) {
            idx += 1;
        }
        if idx == attr_start {
            idx += 1;
            continue;
        }

        let attr_name = String::from_utf8_lossy(&bytes[attr_start..idx]).to_ascii_lowercase();
        idx = skip_spaces(bytes, idx);

        let mut value = String::new();
        if bytes.get(idx).copied() == Some(b'=') {
            idx = skip_spaces(bytes, idx + 1);
            match bytes.get(idx).copied() {
                Some(quote @ (b'"' | b'\'')) => {
                    let value_start = idx + 1;
                    let value_end = find_byte(bytes, value_start, quote)?;
                    value = String::from_utf8_lossy(&bytes[value_start..value_end]).into_owned();
                    idx = value_end + 1;
                }
                _ => {
                    let value_start = idx;
                    while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>'
                    {
                        idx += 1;
                    }
                    value = String::from_utf8_lossy(&bytes[value_start..idx]).into_owned();
                }
            }
        }

        // First occurrence of a duplicated attribute wins.
        if !attrs.iter().any(|(existing, _)| *existing == attr_name) {
            attrs.push((attr_name, decode_entities(&value)));
        }
    }

    Some((
        Token::Start {
            name,
            attrs,
            self_closing,
        },
        idx,
    ))
}

fn skip_to_gt(bytes: &[u8], from: usize) -> usize {
    find_byte(bytes, from, b'>')
        .map(|idx| idx + 1)
        .unwrap_or(bytes.len())
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    idx
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attr_name_char(byte: u8) -> bool {
    !byte.is_ascii_whitespace() && !matches!(byte, b'>' | b'/' | b'=' | b'"' | b'\'')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len()
        && bytes[idx..end]
            .iter()
            .zip(pattern.iter())
            .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::HtmlParser;
    use super::decode_entities;
    use xv_dom::DOCUMENT_NODE;
    use xv_dom::Selector;

    #[test]
    fn parses_title_and_structure() {
        let doc = HtmlParser.parse(
            "<!DOCTYPE html><html><head><title> Build   Status </title></head><body><div id='toc'></div></body></html>",
        );
        assert_eq!(doc.title, "Build Status");
        assert!(doc.element_by_id("toc").is_some());
    }

    #[test]
    fn reads_binding_attributes() {
        let doc = HtmlParser.parse(
            "<div id=jobs load=\"/jobs.xml\" on-request>placeholder</div>",
        );
        let div = match doc.element_by_id("jobs") {
            Some(node) => node,
            None => panic!("div not parsed"),
        };
        assert_eq!(doc.attr(div, "load"), Some("/jobs.xml"));
        assert_eq!(doc.attr(div, "on-request"), Some(""));
    }

    #[test]
    fn keeps_script_contents_raw() {
        let doc = HtmlParser.parse("<script>if (a < b && c) {}</script><p>a &amp; b</p>");
        let script = match Selector::parse("script") {
            Ok(selector) => doc.select(DOCUMENT_NODE, &selector),
            Err(error) => panic!("{error}"),
        };
        assert_eq!(doc.text_content(script[0]), "if (a < b && c) {}");
        assert_eq!(
            doc.to_html(),
            "<script>if (a < b && c) {}</script><p>a &amp; b</p>"
        );
    }

    #[test]
    fn void_and_mismatched_tags_do_not_nest() {
        let doc = HtmlParser.parse("<ul><li>one<br>two</span></li><li>three</ul><p>after</p>");
        assert_eq!(
            doc.to_html(),
            "<ul><li>one<br>two</li><li>three</li></ul><p>after</p>"
        );
    }

    #[test]
    fn decodes_numeric_and_named_entities() {
        assert_eq!(decode_entities("&#8635; Reload &lt;now&gt; &#x41;"), "\u{21bb} Reload <now> A");
        assert_eq!(decode_entities("AT&T"), "AT&T");
    }
}
