/// Builds the extraction prompt for one article.
pub fn analysis_prompt(title: &str, content: &str) -> String {
    format!(
        r#"<scraped_news_article>
# {title}

{content}
</scraped_news_article>

Read the news article above and answer with a single JSON object of this shape:

{{
  "language": "string",  // ISO 639-1 alpha-2 code of the article's main language
  "location": "string",  // ISO 3166-1 alpha-3 country code, or GLOBAL, or N/A
  "completeness": "COMPLETE" | "PARTIAL_USEFUL" | "PARTIAL_USELESS",
  "relevance": "RELEVANT" | "NOT_RELEVANT",
  "summary": {{ "headline": "string", "entities": ["string"], "event": "string", "context": "string" }}
}}

location:
- the alpha-3 code of the country the story is about, when one country clearly applies
- GLOBAL for stories spanning many countries, N/A when no place applies

completeness:
- COMPLETE: the whole article is present, with no paywall, gaps or truncation
- PARTIAL_USEFUL: something is missing (paywall, subscription prompt, cut off) but the core story is there
- PARTIAL_USELESS: blocked or truncated down to a headline or intro with no real substance

relevance:
- RELEVANT: substantive reporting of facts or meaningful analysis
- NOT_RELEVANT: celebrity gossip, clickbait, tabloid items, fluff or sponsored content

summary, only when relevance is RELEVANT and completeness is not PARTIAL_USELESS (omit it otherwise):
- headline: the story in 5 to 10 words
- entities: the key people, organisations and countries involved
- event: what happened, in at most 2 sentences
- context: why it matters or what sets it apart, in 1 sentence
Keep the summary to distinct, concrete details that would group this story with others covering the same event. Skip opinion and padding.

Return only the JSON object."#,
        title = title.trim(),
        content = content.trim(),
    )
}
