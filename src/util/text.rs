use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use url::Url;

/// Query parameters that only carry campaign/click tracking and never change
/// what a URL points to.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
];

/// Normalizes whitespace in scraped or feed-provided text.
///
/// - runs of horizontal whitespace collapse to a single space
/// - leading/trailing whitespace is stripped from every line
/// - consecutive blank lines collapse to one
/// - the result is trimmed at both ends
/// - control characters (other than newline) are dropped
///
/// The function is idempotent: `clean_text(&clean_text(s)) == clean_text(s)`.
///
/// # Examples
///
/// ```
/// use meridian_ingest::util::clean_text;
///
/// assert_eq!(clean_text("  Hello \t  world \n\n\n\n next  "), "Hello world\n\nnext");
/// ```
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let mut words = line
            .split(|c: char| c.is_whitespace() || c.is_control())
            .filter(|w| !w.is_empty());

        let Some(first) = words.next() else {
            // Blank lines before the first content line are dropped entirely
            if !out.is_empty() {
                pending_blank = true;
            }
            continue;
        };

        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;

        out.push_str(first);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
    }

    out
}

/// Removes tracking parameters (`utm_*`, `fbclid`, `gclid`) from a URL.
///
/// Total: input that does not parse as an absolute URL is returned unchanged,
/// and a URL without tracking parameters is returned byte-for-byte as given.
pub fn clean_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    let has_tracking = url
        .query_pairs()
        .any(|(key, _)| TRACKING_PARAMS.contains(&key.as_ref()));
    if !has_tracking {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.to_string()
}

/// Parses the date formats found in the wild across RSS, Atom and Dublin Core.
///
/// Tries RFC 2822 (RSS `pubDate`), RFC 3339 (Atom, `dc:date`), then a handful of
/// lenient forms. Values without an offset are taken as UTC. Returns `None`
/// when nothing matches; callers treat that as "no date".
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // "Tuesday, 18 Mar 2025 ..." - chrono only accepts abbreviated weekdays,
    // and RFC 2822 allows the weekday to be omitted entirely.
    if let Some((_, rest)) = s.split_once(", ") {
        if let Ok(dt) = DateTime::parse_from_rfc2822(rest.trim()) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%a, %d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
