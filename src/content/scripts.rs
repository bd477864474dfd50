//! Page scripts injected by the rendering service before the DOM is captured.
//! Each one is self-contained and must not throw.

/// Forces `Intl.DateTimeFormat` to en-US so rendered dates parse consistently.
const FORCE_EN_US_DATES: &str = r#"(() => {
  const Original = Intl.DateTimeFormat;
  Object.defineProperty(Intl, 'DateTimeFormat', {
    writable: true,
    value: new Proxy(Original, { construct: (target, args) => new target('en-US', Object.assign({}, args[1])) }),
  });
})();"#;

/// Clicks the first cookie/consent accept control.
const ACCEPT_COOKIES: &str = r#"(() => {
  const button = Array.from(document.querySelectorAll('button, a')).find((el) => {
    const text = (el.textContent || '').toLowerCase();
    return text.includes('accept') && (text.includes('cookie') || text.includes('consent'));
  });
  if (button) { try { button.click(); } catch (_) {} }
})();"#;

/// Removes paywall/subscribe overlays and modals, then restores scrolling.
const REMOVE_PAYWALL_OVERLAYS: &str = r#"(() => {
  const gated = (el) => {
    const id = (el.id || '').toLowerCase();
    const cls = (typeof el.className === 'string' ? el.className : '').toLowerCase();
    return ['paywall', 'subscribe'].some((word) => id.includes(word) || cls.includes(word));
  };
  document.querySelectorAll('div, section').forEach((el) => { if (gated(el)) el.remove(); });
  document.querySelectorAll('.modal, .modal-backdrop, body > div[style*="position: fixed"]').forEach((el) => el.remove());
  document.body.style.overflow = 'auto';
})();"#;

/// Deletes page chrome that is never part of the story.
const REMOVE_CHROME: &str = r#"(() => {
  const chrome = [
    'script', 'style', 'iframe', '.ad', '.ads', '.advertisement', '[class*="social"]', '[id*="social"]',
    '.share', '.comments', 'aside', 'nav', 'header:not(article header)', 'footer:not(article footer)',
    '[role="complementary"]', '[role="banner"]', '[role="navigation"]', 'form', '.related',
    '.recommended', '.newsletter', '.subscription',
  ];
  document.querySelectorAll(chrome.join(', ')).forEach((el) => el.remove());
})();"#;

/// Strips every attribute except href, src, alt and title.
const STRIP_ATTRIBUTES: &str = r#"(() => {
  const keep = new Set(['href', 'src', 'alt', 'title']);
  document.querySelectorAll('*').forEach((el) => {
    for (const attr of Array.from(el.attributes)) {
      if (!keep.has(attr.name.toLowerCase())) el.removeAttribute(attr.name);
    }
  });
})();"#;

/// Repeatedly removes containers left empty by the previous scripts.
const REMOVE_EMPTY_CONTAINERS: &str = r#"(() => {
  let removed;
  do {
    removed = 0;
    document.querySelectorAll('div, span, p, section, article').forEach((el) => {
      if (!el.hasChildNodes() || el.textContent.trim() === '') { el.remove(); removed++; }
    });
  } while (removed > 0);
})();"#;

/// Removes meta tags with at most one attribute.
const REMOVE_BARE_META: &str = r#"(() => {
  document.querySelectorAll('meta').forEach((meta) => { if (meta.attributes.length <= 1) meta.remove(); });
})();"#;

/// Scripts in injection order.
pub const PAGE_SCRIPTS: &[&str] = &[
    FORCE_EN_US_DATES,
    ACCEPT_COOKIES,
    REMOVE_PAYWALL_OVERLAYS,
    REMOVE_CHROME,
    STRIP_ATTRIBUTES,
    REMOVE_EMPTY_CONTAINERS,
    REMOVE_BARE_META,
];
