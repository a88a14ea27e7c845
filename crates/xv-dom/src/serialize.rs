//! HTML serialisation helpers shared by documents and fragments.

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(tag))
}

pub fn is_raw_text_element(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style")
}

pub fn escape_text(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

pub fn escape_attr(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

pub fn write_start_tag(tag: &str, attrs: &[(String, String)], out: &mut String) {
    out.push('<');
    out.push_str(tag);
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');
}

pub fn write_end_tag(tag: &str, out: &mut String) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

pub fn write_comment(text: &str, out: &mut String) {
    out.push_str("<!--");
    out.push_str(&text.replace("--", "- -"));
    out.push_str("-->");
}

#[cfg(test)]
mod tests {
    use super::escape_attr;
    use super::escape_text;
    use super::is_void_element;

    #[test]
    fn escapes_markup_in_text_and_attributes() {
        let mut text = String::new();
        escape_text("a < b & c", &mut text);
        assert_eq!(text, "a &lt; b &amp; c");

        let mut attr = String::new();
        escape_attr("say \"hi\"", &mut attr);
        assert_eq!(attr, "say &quot;hi&quot;");
    }

    #[test]
    fn void_elements_are_case_insensitive() {
        assert!(is_void_element("BR"));
        assert!(!is_void_element("div"));
    }
}
