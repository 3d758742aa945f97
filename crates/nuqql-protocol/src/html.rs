//! Message text travels over the socket as a single line: literal newlines
//! are carried as `<br/>` tags and `&`, `<`, `>` as entities. These helpers
//! convert between the wire form and the display form.

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    // &amp; last so freshly decoded ampersands are not expanded twice.
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Replace `<br>`/`<br/>` tags (case-insensitive) with newlines.
pub fn br_to_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(len) = br_tag_len(rest.as_bytes()) {
            out.push('\n');
            rest = &rest[len..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

fn br_tag_len(rest: &[u8]) -> Option<usize> {
    const TAGS: [&[u8]; 2] = [b"<br/>", b"<br>"];
    TAGS.into_iter()
        .find(|tag| rest.len() >= tag.len() && rest[..tag.len()].eq_ignore_ascii_case(tag))
        .map(<[u8]>::len)
}

pub fn newlines_to_br(text: &str) -> String {
    text.replace('\n', "<br/>")
}

/// Inbound direction: tags to newlines, then entities back to characters.
pub fn decode_text(text: &str) -> String {
    unescape(&br_to_newlines(text))
}

/// Outbound direction: entities first so the inserted tags survive escaping.
pub fn encode_text(text: &str) -> String {
    newlines_to_br(&escape(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_and_unescape_are_inverse() {
        let original = "a < b && b > c\nnext";
        assert_eq!(unescape(&escape(original)), original);
    }

    #[test]
    fn br_tags_become_newlines_case_insensitively() {
        assert_eq!(br_to_newlines("Hi<br>there"), "Hi\nthere");
        assert_eq!(br_to_newlines("Hi<BR/>there"), "Hi\nthere");
        assert_eq!(br_to_newlines("a<br>b<Br/>c"), "a\nb\nc");
    }

    #[test]
    fn lone_angle_brackets_survive() {
        assert_eq!(br_to_newlines("a < b"), "a < b");
        assert_eq!(br_to_newlines("<brx>"), "<brx>");
    }

    #[test]
    fn encode_then_decode_round_trips_multiline_text() {
        let original = "first & second\nthird <line>";
        assert_eq!(decode_text(&encode_text(original)), original);
    }

    #[test]
    fn decode_handles_multibyte_text() {
        assert_eq!(decode_text("héllo<br>wörld"), "héllo\nwörld");
    }
}
