use std::collections::HashMap;

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use super::ArticleError;
use crate::util::clean_text;

/// Containers that usually wrap the main story, most specific first.
const CONTENT_CONTAINERS: &[&str] = &[
    "article",
    "[itemprop=\"articleBody\"]",
    ".article-body",
    ".article-content",
    ".story-body",
    ".entry-content",
    ".post-content",
    "main",
    "#article",
    ".article",
    ".content",
    ".post",
];

/// Subtrees that never contribute article text.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "aside", "footer", "header", "form",
    "button", "iframe", "svg", "figure", "select", "dialog",
];

/// Elements that start a new line in the extracted text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul",
    "ol", "blockquote", "pre", "table", "tr", "br", "hr", "figcaption", "dd", "dt",
];

const PUBLISHED_TIME_SELECTORS: &[(&str, &str)] = &[
    ("meta[property=\"article:published_time\"]", "content"),
    ("meta[name=\"pubdate\"]", "content"),
    ("meta[itemprop=\"datePublished\"]", "content"),
    ("time[datetime]", "datetime"),
];

/// Readable content extracted from an article page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContent {
    pub title: String,
    /// Whitespace-normalized body text, paragraphs separated by blank lines.
    pub text: String,
    /// Publication time exactly as the page declares it, when present.
    pub published_time: Option<String>,
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn attr_of(document: &Html, css: &str, attr: &str) -> Option<String> {
    select_first(document, css)
        .and_then(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn extract_title(document: &Html) -> Option<String> {
    attr_of(document, "meta[property=\"og:title\"]", "content")
        .map(|t| clean_text(&t))
        .or_else(|| select_first(document, "title").map(element_text))
        .or_else(|| select_first(document, "h1").map(element_text))
        .filter(|t| !t.is_empty())
}

fn extract_published_time(document: &Html) -> Option<String> {
    PUBLISHED_TIME_SELECTORS
        .iter()
        .find_map(|(css, attr)| attr_of(document, css, attr))
}

/// Total paragraph text length under `el`, the measure used to rank candidates.
fn paragraph_score(el: ElementRef<'_>, paragraphs: &Selector) -> usize {
    el.select(paragraphs)
        .map(|p| p.text().map(str::trim).map(str::len).sum::<usize>())
        .sum()
}

/// Picks the element most likely to hold the story: the best-scoring
/// semantic container, or the element directly holding the most paragraph
/// text when that beats every container.
fn find_content_root<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
    let paragraphs = Selector::parse("p").ok()?;
    let mut best: Option<(ElementRef<'a>, usize)> = None;

    let mut consider = |el: ElementRef<'a>, score: usize| {
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((el, score));
        }
    };

    for css in CONTENT_CONTAINERS {
        if let Ok(selector) = Selector::parse(css) {
            for el in document.select(&selector) {
                consider(el, paragraph_score(el, &paragraphs));
            }
        }
    }

    let mut by_parent: HashMap<_, usize> = HashMap::new();
    for p in document.select(&paragraphs) {
        if let Some(parent) = p.parent() {
            let len: usize = p.text().map(str::trim).map(str::len).sum();
            *by_parent.entry(parent.id()).or_default() += len;
        }
    }
    for (id, _) in by_parent {
        if let Some(el) = document.tree.get(id).and_then(ElementRef::wrap) {
            consider(el, paragraph_score(el, &paragraphs));
        }
    }

    best.map(|(el, _)| el)
        .or_else(|| select_first(document, "body"))
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let is_block = BLOCK_TAGS.contains(&name);
                // Paragraph-level blocks get a blank line so they survive as paragraphs
                let separator = if matches!(name, "p" | "h2" | "h3" | "h4" | "blockquote") {
                    "\n\n"
                } else {
                    "\n"
                };
                if is_block {
                    out.push_str(separator);
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if is_block {
                    out.push_str(separator);
                }
            }
            _ => {}
        }
    }
}

/// Extracts the readable article (title, body text, publication time) from
/// an HTML document.
///
/// # Errors
///
/// [`ArticleError::NoArticleFound`] when no title or no body text can be
/// identified.
pub fn parse_article(html: &str) -> Result<ArticleContent, ArticleError> {
    let document = Html::parse_document(html);

    let title = extract_title(&document).ok_or(ArticleError::NoArticleFound)?;

    let root = find_content_root(&document).ok_or(ArticleError::NoArticleFound)?;
    let mut raw = String::new();
    collect_text(root, &mut raw);
    let text = clean_text(&raw);
    if text.is_empty() {
        return Err(ArticleError::NoArticleFound);
    }

    Ok(ArticleContent {
        title,
        text,
        published_time: extract_published_time(&document),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STORY: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Port strike ends | Daily Wire</title>
  <meta property="og:title" content="Port strike ends after 12 days">
  <meta property="article:published_time" content="2025-03-18T08:00:00Z">
  <script>var tracking = "should not appear";</script>
</head>
<body>
  <header><nav><a href="/">Home</a> <a href="/world">World</a></nav></header>
  <main>
    <article>
      <h1>Port strike ends after 12 days</h1>
      <p>Dock workers voted on Monday to accept a new contract.</p>
      <p>The   agreement raises wages by   8 percent over three years.</p>
      <aside>Related: Shipping rates climb</aside>
      <p>Cargo traffic is expected to normalise within a week.</p>
    </article>
  </main>
  <footer>Copyright Daily Wire</footer>
</body>
</html>"#;

    #[test]
    fn test_extracts_title_text_and_time() {
        let article = parse_article(STORY).unwrap();

        assert_eq!(article.title, "Port strike ends after 12 days");
        assert_eq!(
            article.published_time.as_deref(),
            Some("2025-03-18T08:00:00Z")
        );
        assert_eq!(
            article.text,
            "Port strike ends after 12 days\n\n\
             Dock workers voted on Monday to accept a new contract.\n\n\
             The agreement raises wages by 8 percent over three years.\n\n\
             Cargo traffic is expected to normalise within a week."
        );
    }

    #[test]
    fn test_excludes_navigation_scripts_and_asides() {
        let article = parse_article(STORY).unwrap();
        assert!(!article.text.contains("Home"));
        assert!(!article.text.contains("tracking"));
        assert!(!article.text.contains("Related"));
        assert!(!article.text.contains("Copyright"));
    }

    #[test]
    fn test_falls_back_to_densest_paragraph_parent() {
        let html = r#"<html><head><title>Plain page</title></head><body>
            <div class="sidebar"><p>Short.</p></div>
            <div class="body-copy">
              <p>First long paragraph of the story with plenty of words in it.</p>
              <p>Second long paragraph that continues the reporting at length.</p>
            </div>
        </body></html>"#;
        let article = parse_article(html).unwrap();

        assert_eq!(article.title, "Plain page");
        assert!(article.text.starts_with("First long paragraph"));
        assert!(!article.text.contains("Short."));
        assert_eq!(article.published_time, None);
    }

    #[test]
    fn test_richest_container_wins_over_smaller_ones() {
        let html = r#"<html><head><title>Two articles</title></head><body>
            <article><p>Teaser.</p></article>
            <article>
              <p>The full report runs across several long paragraphs of text.</p>
              <p>It keeps going with more detail than the teaser ever had.</p>
            </article>
        </body></html>"#;
        let article = parse_article(html).unwrap();

        assert!(article.text.starts_with("The full report"));
        assert!(!article.text.contains("Teaser."));
    }

    #[test]
    fn test_time_element_datetime() {
        let html = r#"<html><head><title>T</title></head><body><article>
            <time datetime="2025-01-02">Jan 2</time><p>Body text.</p></article></body></html>"#;
        let article = parse_article(html).unwrap();
        assert_eq!(article.published_time.as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn test_no_title_is_no_article() {
        let html = "<html><body><p>Text without any title.</p></body></html>";
        assert!(matches!(
            parse_article(html),
            Err(ArticleError::NoArticleFound)
        ));
    }

    #[test]
    fn test_no_text_is_no_article() {
        let html = "<html><head><title>Empty</title><script>x()</script></head><body>   </body></html>";
        assert!(matches!(
            parse_article(html),
            Err(ArticleError::NoArticleFound)
        ));
    }
}
