use crate::config::PoshmarkConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::PublishError;
use crate::models::{MarketplaceCredential, ScrapedItem};
use crate::poshmark::publish::external_id_from_url;
use crate::poshmark::session::{BrowserSessionManager, looks_blocked};
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Extracts one structured record per listing card out of the rendered
/// closet page. Selector candidates are tried in order; when none match,
/// listing links themselves are scanned as a last resort.
const CARD_EXTRACTION_JS: &str = r#"
(() => {
    const selectors = ['div[data-et-name="listing"]', '.card--small', '.tile'];
    let cards = [];
    for (const sel of selectors) {
        cards = Array.from(document.querySelectorAll(sel));
        if (cards.length) break;
    }
    if (!cards.length) {
        cards = Array.from(document.querySelectorAll('a[href*="/listing/"]'))
            .map(a => a.closest('div') || a);
    }
    return cards.map(card => {
        const link = card.matches && card.matches('a[href*="/listing/"]')
            ? card
            : card.querySelector('a[href*="/listing/"]');
        const img = card.querySelector ? card.querySelector('img') : null;
        const titleEl = card.querySelector
            ? (card.querySelector('[class*="title" i]') || link)
            : link;
        const priceEl = card.querySelector ? card.querySelector('[class*="price" i]') : null;
        return {
            url: link ? link.href : null,
            title: titleEl && titleEl.textContent ? titleEl.textContent.trim() : null,
            price: priceEl && priceEl.textContent ? priceEl.textContent.trim() : null,
            image: img ? (img.src || img.getAttribute('data-src')) : null,
        };
    }).filter(card => card.url);
})()
"#;

#[derive(Debug, Deserialize)]
struct RawCard {
    url: Option<String>,
    title: Option<String>,
    price: Option<String>,
    image: Option<String>,
}

/// Reads the user's closet back out of the rendered site. An empty closet is
/// a valid result; a diagnostic screenshot is captured so a selector drift
/// can be told apart from a genuinely empty account.
pub struct InventoryScraper {
    config: Arc<PoshmarkConfig>,
    sessions: Arc<BrowserSessionManager>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl InventoryScraper {
    pub fn new(
        config: Arc<PoshmarkConfig>,
        sessions: Arc<BrowserSessionManager>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self { config, sessions, diagnostics }
    }

    pub async fn scrape(&self, user_id: i64) -> Result<Vec<ScrapedItem>, PublishError> {
        self.sessions
            .with_authenticated_session(user_id, |page, credential| async move {
                self.scrape_closet(&page, &credential).await
            })
            .await
    }

    async fn scrape_closet(
        &self,
        page: &Page,
        credential: &MarketplaceCredential,
    ) -> Result<Vec<ScrapedItem>, PublishError> {
        let username =
            settled_username(self.live_username(page).await, credential.username.as_deref())?;

        self.sessions.goto(page, &self.config.closet_url(&username)).await?;
        let content = page.content().await?;
        if looks_blocked(&content) {
            return Err(PublishError::BotBlocked);
        }
        tokio::time::sleep(self.config.settle_delay).await;

        let cards: Vec<RawCard> = page
            .evaluate(CARD_EXTRACTION_JS)
            .await?
            .into_value()
            .map_err(|err| PublishError::Browser(format!("card extraction: {err}")))?;
        let items: Vec<ScrapedItem> = cards.into_iter().filter_map(to_scraped_item).collect();

        if items.is_empty() {
            if let Ok(bytes) = page
                .screenshot(ScreenshotParams::builder().full_page(true).build())
                .await
            {
                if let Some(reference) =
                    self.diagnostics.capture("poshmark-closet-empty", &bytes).await
                {
                    warn!(target = "listbridge.poshmark", artifact = %reference, "empty_closet_snapshot");
                }
            }
        }
        info!(
            target = "listbridge.poshmark",
            username = %username,
            count = items.len(),
            "closet_scraped"
        );
        Ok(items)
    }

    /// Resolve the account's username from the logged-in page itself; the
    /// stored value is only a fallback since it may lag a rename.
    async fn live_username(&self, page: &Page) -> Option<String> {
        let href: Option<String> = page
            .evaluate(
                "(() => { const a = document.querySelector('a[href*=\"/closet/\"]'); \
                 return a ? a.getAttribute('href') : null; })()",
            )
            .await
            .ok()?
            .into_value()
            .ok()?;
        href.as_deref().and_then(closet_slug)
    }
}

/// Prefer the username read off the live page; fall back to the stored one.
/// A credential carrying neither is incomplete, not an expired session.
pub(crate) fn settled_username(
    live: Option<String>,
    stored: Option<&str>,
) -> Result<String, PublishError> {
    live.or_else(|| stored.map(str::to_string))
        .ok_or(PublishError::NotConnected)
}

fn to_scraped_item(card: RawCard) -> Option<ScrapedItem> {
    let url = card.url.filter(|u| !u.is_empty())?;
    let slug = external_id_from_url(&url)?;
    let title = match card.title.filter(|t| !t.is_empty()) {
        Some(title) => title,
        None => title_from_slug(&slug),
    };
    let price = card.price.as_deref().and_then(first_price_token).unwrap_or(0.0);
    Some(ScrapedItem {
        sku: format!("POSH-{}", id_token(&slug)),
        title,
        price,
        image_url: card.image.filter(|i| !i.is_empty()),
        external_url: url,
    })
}

/// First whitespace-separated token that parses as a number, ignoring `$`
/// and thousands separators. Crossed-out original prices come after the
/// current price in the rendered card, so "first" is the right pick.
pub(crate) fn first_price_token(raw: &str) -> Option<f64> {
    raw.split_whitespace()
        .map(|token| token.trim_start_matches('$').replace(',', ""))
        .find_map(|token| token.parse::<f64>().ok())
}

/// Trailing object-id token of a listing slug, or the whole slug when no
/// id-like token is present.
pub(crate) fn id_token(slug: &str) -> &str {
    match slug.rsplit_once('-') {
        Some((_, tail)) if tail.len() >= 12 && tail.chars().all(|c| c.is_ascii_hexdigit()) => tail,
        _ => slug,
    }
}

/// Human-readable title recovered from a listing slug: the id token is
/// dropped and hyphens become spaces.
pub(crate) fn title_from_slug(slug: &str) -> String {
    let base = match slug.rsplit_once('-') {
        Some((head, tail))
            if tail.len() >= 12 && tail.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            head
        }
        _ => slug,
    };
    base.replace('-', " ")
}

fn closet_slug(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let mut segments = path.split('/').skip_while(|s| *s != "closet");
    segments.next()?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
