//! Response body to text.

use encoding_rs::Encoding;

/// Decodes a body using BOM, then `charset=`, then the XML declaration, then UTF-8.
pub fn decode_text(body: &[u8], content_type: &str) -> String {
    if let Some((encoding, bom_length)) = Encoding::for_bom(body) {
        let (decoded, _) = encoding.decode_without_bom_handling(&body[bom_length..]);
        return decoded.into_owned();
    }

    let label = charset_from_content_type(content_type).or_else(|| xml_declared_encoding(body));
    if let Some(encoding) = label.and_then(|label| Encoding::for_label(label.as_bytes())) {
        let (decoded, _, _) = encoding.decode(body);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(body).into_owned()
}

pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let label = value.trim().trim_matches('"').trim_matches('\'');
        (!label.is_empty()).then(|| label.to_owned())
    })
}

/// `encoding` pseudo-attribute of a leading `<?xml ...?>`.
fn xml_declared_encoding(body: &[u8]) -> Option<String> {
    let prefix = body.get(..body.len().min(256))?;
    if !prefix.starts_with(b"<?xml") {
        return None;
    }
    let end = prefix.windows(2).position(|window| window == b"?>")?;
    let declaration = String::from_utf8_lossy(&prefix[..end]);
    let rest = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|ch| *ch == '"' || *ch == '\'')?;
    let value = &rest[1..];
    let close = value.find(quote)?;
    Some(value[..close].to_owned())
}

#[cfg(test)]
mod tests {
    use super::charset_from_content_type;
    use super::decode_text;

    #[test]
    fn content_type_charset_wins_over_declaration() {
        let body = b"<?xml version='1.0' encoding='utf-8'?><a>\xe9</a>";
        let decoded = decode_text(body, "text/xml; charset=\"ISO-8859-1\"");
        assert_eq!(decoded, "<?xml version='1.0' encoding='utf-8'?><a>\u{e9}</a>");
    }

    #[test]
    fn xml_declaration_is_used_without_header_charset() {
        let body = b"<?xml version=\"1.0\" encoding=\"windows-1252\"?><a>\x80</a>";
        let decoded = decode_text(body, "application/xml");
        assert!(decoded.ends_with("<a>\u{20ac}</a>"));
    }

    #[test]
    fn bom_is_stripped() {
        let body = b"\xef\xbb\xbf<a/>";
        assert_eq!(decode_text(body, "text/xml; charset=latin1"), "<a/>");
    }

    #[test]
    fn parses_charset_parameter() {
        assert_eq!(
            charset_from_content_type("text/xsl;charset=UTF-8"),
            Some("UTF-8".to_owned())
        );
        assert_eq!(charset_from_content_type("text/xsl"), None);
    }
}
