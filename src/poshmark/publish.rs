use crate::config::PoshmarkConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::PublishError;
use crate::http::build_client;
use crate::models::{LinkStatus, Listing, Marketplace, PublishResult, RemoteListingLink};
use crate::poshmark::session::{BrowserSessionManager, SELECTOR_POLL, looks_blocked, poll_until};
use crate::store::ListingLinkStore;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const FILE_INPUT_SELECTORS: [&str; 2] =
    ["input[type=\"file\"][accept*=\"image\"]", "input[type=\"file\"]"];
const TITLE_SELECTORS: [&str; 3] = [
    "input[name*=\"title\" i]",
    "input[placeholder*=\"title\" i]",
    "textarea[name*=\"title\" i]",
];
const DESCRIPTION_SELECTORS: [&str; 3] = [
    "textarea[name*=\"description\" i]",
    "textarea[placeholder*=\"description\" i]",
    "textarea[placeholder*=\"tell\" i]",
];
const PRICE_SELECTORS: [&str; 3] = [
    "input[name*=\"price\" i]",
    "input[type=\"number\"][placeholder*=\"price\" i]",
    "input[placeholder*=\"$\" i]",
];
const BRAND_SELECTORS: [&str; 2] =
    ["input[name*=\"brand\" i]", "input[placeholder*=\"brand\" i]"];
const PUBLISH_CSS_SELECTORS: [&str; 2] =
    ["[data-testid*=\"publish\" i]", "[data-testid*=\"submit\" i]"];
const PUBLISH_XPATHS: [&str; 4] = [
    "//button[contains(., 'Publish')]",
    "//button[contains(., 'List Item')]",
    "//button[contains(., 'Post')]",
    "//button[contains(., 'Next')]",
];

/// Drives the marketplace's listing-creation form inside an authenticated
/// browser session: attach images, fill the fields that exist, submit, and
/// read the resulting listing URL back.
pub struct AutomationPublisher {
    config: Arc<PoshmarkConfig>,
    sessions: Arc<BrowserSessionManager>,
    links: Arc<dyn ListingLinkStore>,
    diagnostics: Arc<dyn DiagnosticSink>,
    http: Client,
}

impl AutomationPublisher {
    pub fn new(
        config: Arc<PoshmarkConfig>,
        sessions: Arc<BrowserSessionManager>,
        links: Arc<dyn ListingLinkStore>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let http = build_client(config.http_timeouts);
        Self { config, sessions, links, diagnostics, http }
    }

    pub async fn publish(&self, listing: &Listing) -> Result<PublishResult, PublishError> {
        // Source images live behind HTTP; the form wants local files. The
        // scoped dir keeps them alive across the session and cleans up after.
        let staging = tempfile::tempdir()
            .map_err(|err| PublishError::Browser(format!("temp dir: {err}")))?;
        let image_paths = self.download_images(&listing.image_urls, staging.path()).await;

        let (external_id, external_url) = self
            .sessions
            .with_authenticated_session(listing.owner_id, |page, _credential| async move {
                let outcome = self.drive_form(&page, listing, &image_paths).await;
                if outcome.is_err() {
                    self.capture_failure(&page, "poshmark-publish").await;
                }
                outcome
            })
            .await?;

        let mut link = self
            .links
            .get_link(listing.id, Marketplace::Poshmark)
            .await?
            .unwrap_or_else(|| RemoteListingLink::new(listing.id, Marketplace::Poshmark));
        link.status = LinkStatus::Published;
        link.external_id = external_id.clone();
        link.external_url = external_url.clone();
        self.links.upsert_link(link).await?;

        info!(
            target = "listbridge.poshmark",
            listing_id = listing.id,
            external_id = external_id.as_deref().unwrap_or(""),
            "listing_published"
        );
        Ok(PublishResult::published(external_id, external_url))
    }

    async fn drive_form(
        &self,
        page: &Page,
        listing: &Listing,
        image_paths: &[PathBuf],
    ) -> Result<(Option<String>, Option<String>), PublishError> {
        self.sessions.goto(page, &self.config.new_listing_url()).await?;
        let content = page.content().await?;
        if looks_blocked(&content) {
            return Err(PublishError::BotBlocked);
        }

        if !image_paths.is_empty() {
            self.attach_images(page, image_paths).await?;
        }

        // A page with no title field is not the listing form; submitting
        // blind would create garbage, so this is terminal.
        if !self.fill_first(page, &TITLE_SELECTORS, listing.title.as_deref().unwrap_or("Untitled")).await? {
            return Err(PublishError::FormNotFound);
        }
        if !self
            .fill_first(
                page,
                &DESCRIPTION_SELECTORS,
                listing.description.as_deref().unwrap_or("No description"),
            )
            .await?
        {
            warn!(target = "listbridge.poshmark", "description_field_missing");
        }
        let price = listing.price.unwrap_or(0.0);
        if !self.fill_first(page, &PRICE_SELECTORS, &format!("{}", price as i64)).await? {
            warn!(target = "listbridge.poshmark", "price_field_missing");
        }
        if let Some(brand) = listing.brand.as_deref() {
            let _ = self.fill_first(page, &BRAND_SELECTORS, brand).await?;
        }

        if !self.click_publish_control(page).await? {
            return Err(PublishError::FormNotFound);
        }

        // The post-submit redirect may never go network-idle; the timeout is
        // tolerated and the URL read regardless.
        let _ = tokio::time::timeout(self.config.navigation_timeout, page.wait_for_navigation())
            .await;
        tokio::time::sleep(self.config.settle_delay).await;

        let url = page.url().await?.unwrap_or_default();
        let external_id = external_id_from_url(&url);
        let external_url = if url.is_empty() { None } else { Some(url) };
        Ok((external_id, external_url))
    }

    async fn attach_images(&self, page: &Page, paths: &[PathBuf]) -> Result<(), PublishError> {
        let input = self
            .sessions
            .find_first(page, &FILE_INPUT_SELECTORS)
            .await
            .ok_or(PublishError::FormNotFound)?;

        let params = SetFileInputFilesParams::builder()
            .files(paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>())
            .backend_node_id(input.backend_node_id)
            .build()
            .map_err(PublishError::Browser)?;
        page.execute(params).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// Fill the first candidate that attaches within the selector timeout.
    async fn fill_first(
        &self,
        page: &Page,
        selectors: &[&str],
        text: &str,
    ) -> Result<bool, PublishError> {
        match self.sessions.find_first(page, selectors).await {
            Some(element) => {
                element.click().await?;
                element.type_str(text).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn click_publish_control(&self, page: &Page) -> Result<bool, PublishError> {
        let control =
            poll_until(self.config.selector_timeout, SELECTOR_POLL, move || async move {
                for selector in PUBLISH_CSS_SELECTORS {
                    if let Ok(element) = page.find_element(selector).await {
                        return Some(element);
                    }
                }
                for xpath in PUBLISH_XPATHS {
                    if let Ok(element) = page.find_xpath(xpath).await {
                        return Some(element);
                    }
                }
                None
            })
            .await;
        match control {
            Some(element) => {
                element.click().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn download_images(&self, urls: &[String], dir: &Path) -> Vec<PathBuf> {
        let downloads = urls
            .iter()
            .filter(|url| url.starts_with("http"))
            .take(self.config.max_images)
            .enumerate()
            .map(|(index, url)| {
                let client = self.http.clone();
                let path = dir.join(format!("image-{index:02}.jpg"));
                let url = url.clone();
                async move {
                    let response = client.get(&url).send().await.ok()?;
                    if !response.status().is_success() {
                        return None;
                    }
                    let bytes = response.bytes().await.ok()?;
                    tokio::fs::write(&path, &bytes).await.ok()?;
                    Some(path)
                }
            });
        let mut paths: Vec<PathBuf> = futures::stream::iter(downloads)
            .buffer_unordered(self.config.image_download_concurrency)
            .filter_map(|path| async move { path })
            .collect()
            .await;
        paths.sort();
        if paths.is_empty() && !urls.is_empty() {
            warn!(target = "listbridge.poshmark", "no_source_images_downloaded");
        }
        paths
    }

    async fn capture_failure(&self, page: &Page, label: &str) {
        let shot = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await;
        match shot {
            Ok(bytes) => {
                if let Some(reference) = self.diagnostics.capture(label, &bytes).await {
                    warn!(target = "listbridge.poshmark", artifact = %reference, "failure_screenshot_saved");
                }
            }
            Err(err) => {
                warn!(target = "listbridge.poshmark", error = %err, "failure_screenshot_failed");
            }
        }
    }
}

/// The listing id is the path segment after `/listing/` or `/closet/`,
/// with any query string stripped.
pub(crate) fn external_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segments: Vec<&str> = path.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if matches!(*segment, "listing" | "closet") {
            if let Some(next) = segments.get(i + 1) {
                if !next.is_empty() && *next != "new" {
                    return Some((*next).to_string());
                }
            }
        }
    }
    None
}
