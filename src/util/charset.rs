use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// How far into a page we look for a `<meta charset>` declaration.
const META_SNIFF_LEN: usize = 1024;

/// Decodes an HTML body to UTF-8.
///
/// The encoding is chosen in this order: byte order mark, the `charset`
/// parameter of `content_type`, a `<meta>` declaration near the top of the
/// page, then a statistical guess for bodies that are not valid UTF-8.
/// Undecodable sequences become U+FFFD rather than failing.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| content_type.and_then(charset_param))
        .or_else(|| meta_charset(bytes))
        .unwrap_or_else(|| guess_encoding(bytes));

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "Replaced malformed sequences while decoding");
    }
    text.into_owned()
}

/// Reads the `charset=` parameter of a Content-Type value.
fn charset_param(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| Encoding::for_label(value.trim().trim_matches(['"', '\'']).as_bytes()))
            .flatten()
    })
}

/// Finds `charset=` in the head of the page, covering both
/// `<meta charset="...">` and the `http-equiv` Content-Type form.
fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SNIFF_LEN)];
    let lowered = head.to_ascii_lowercase();
    let needle = b"charset=";
    let start = lowered.windows(needle.len()).position(|w| w == needle)? + needle.len();

    let label: Vec<u8> = lowered[start..]
        .iter()
        .copied()
        .skip_while(|b| *b == b'"' || *b == b'\'')
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
        .collect();
    Encoding::for_label(&label)
}

fn guess_encoding(bytes: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_charset_wins_over_default() {
        let body = b"<p>Fran\xe7ais</p>";
        assert_eq!(
            decode_html(body, Some("text/html; charset=ISO-8859-1")),
            "<p>Fran\u{e7}ais</p>"
        );
    }

    #[test]
    fn test_meta_charset_forms() {
        let short = b"<html><head><meta charset=\"windows-1252\"></head><p>caf\xe9</p>";
        assert!(decode_html(short, Some("text/html")).ends_with("<p>caf\u{e9}</p>"));

        let equiv = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-15\">\xa4";
        assert!(decode_html(equiv, None).ends_with('\u{20ac}'));
    }

    #[test]
    fn test_bom_overrides_declarations() {
        let body = b"\xef\xbb\xbf<meta charset=\"iso-8859-1\"><p>\xc3\xa9t\xc3\xa9</p>";
        assert!(decode_html(body, Some("text/html; charset=iso-8859-1")).ends_with("<p>\u{e9}t\u{e9}</p>"));
    }

    #[test]
    fn test_unlabeled_utf8_passes_through() {
        let body = "<p>\u{e9}t\u{e9} \u{2014} \u{65e5}\u{672c}</p>";
        assert_eq!(decode_html(body.as_bytes(), None), body);
    }

    #[test]
    fn test_unknown_label_falls_back() {
        let body = b"<p>plain</p>";
        assert_eq!(decode_html(body, Some("text/html; charset=x-made-up")), "<p>plain</p>");
    }
}
