use crate::config::PoshmarkConfig;
use crate::error::PublishError;
use crate::models::{Marketplace, MarketplaceCredential, StoredCookie};
use crate::store::CredentialStore;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, CookieSameSite, SetBlockedUrLsParams, TimeSinceEpoch,
};
use chromiumoxide::{Element, Page};
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Static assets have no bearing on form automation, so every session blocks
/// them up front.
const BLOCKED_RESOURCE_PATTERNS: [&str; 10] = [
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.woff", "*.woff2", "*.ttf", "*.mp4",
];

/// Any of these present on a logged-in page means the session is live.
const AUTH_MARKER_SELECTORS: [&str; 4] = [
    "a[href*=\"/user/\"]",
    "a[href*=\"/closet/\"]",
    "button[aria-label*=\"Account\" i]",
    "[data-testid*=\"user\" i]",
];

const EMAIL_SELECTORS: [&str; 4] = [
    "input[name=\"login_form[username_email]\"]",
    "input[type=\"email\"]",
    "input[placeholder*=\"email\" i]",
    "input[placeholder*=\"username\" i]",
];

const INLINE_ERROR_SELECTORS: [&str; 3] = [".error", "[class*=\"error\" i]", "[class*=\"alert\" i]"];

/// Interval between selector probes while waiting for a client-rendered
/// element to attach.
pub(crate) const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Opens an authenticated browser session for one user, runs a task against
/// the page, and tears the browser down on every exit path.
///
/// Authentication prefers the stored cookie jar; when no usable cookies
/// survive filtering it falls back to a username/password form login, after
/// which the live jar is captured and persisted as the refreshed credential.
pub struct BrowserSessionManager {
    config: Arc<PoshmarkConfig>,
    store: Arc<dyn CredentialStore>,
}

impl BrowserSessionManager {
    pub fn new(config: Arc<PoshmarkConfig>, store: Arc<dyn CredentialStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &PoshmarkConfig {
        &self.config
    }

    /// Acquire an authenticated page, run `task`, tear everything down.
    pub async fn with_authenticated_session<T, Fut>(
        &self,
        user_id: i64,
        task: impl FnOnce(Page, MarketplaceCredential) -> Fut,
    ) -> Result<T, PublishError>
    where
        Fut: Future<Output = Result<T, PublishError>>,
    {
        let credential = self.load_credential(user_id).await?;
        let (browser, handler, page) = self.launch().await?;

        let result = match self.authenticate(&page, user_id, &credential).await {
            Ok(()) => task(page.clone(), credential).await,
            Err(err) => Err(err),
        };

        teardown(browser, handler).await;
        result
    }

    /// Cookie-based verification of a stored jar against the live site.
    /// Authentication failures come back as `Ok(false)`; infrastructure
    /// failures propagate.
    pub async fn verify_credential(&self, user_id: i64) -> Result<bool, PublishError> {
        let credential = self.load_credential(user_id).await?;
        let (browser, handler, page) = self.launch().await?;
        let result = self.cookie_login(&page, &credential).await;
        teardown(browser, handler).await;
        match result {
            Ok(()) => Ok(true),
            Err(
                PublishError::SessionExpired
                | PublishError::NoValidCookies
                | PublishError::BotBlocked,
            ) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn load_credential(&self, user_id: i64) -> Result<MarketplaceCredential, PublishError> {
        self.store
            .get_credential(user_id, Marketplace::Poshmark)
            .await?
            .ok_or(PublishError::NotConnected)
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>, Page), PublishError> {
        let mut builder = BrowserConfig::builder()
            .window_size(1280, 720)
            .arg(format!("--user-agent={}", self.config.user_agent));
        if !self.config.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(PublishError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(network::EnableParams::default()).await?;
        page.execute(SetBlockedUrLsParams::new(
            BLOCKED_RESOURCE_PATTERNS.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        ))
        .await?;
        Ok((browser, handle, page))
    }

    async fn authenticate(
        &self,
        page: &Page,
        user_id: i64,
        credential: &MarketplaceCredential,
    ) -> Result<(), PublishError> {
        let has_cookies = credential
            .cookies
            .as_ref()
            .map(|jar| !jar.is_empty())
            .unwrap_or(false);
        if has_cookies {
            match self.cookie_login(page, credential).await {
                Ok(()) => return Ok(()),
                Err(PublishError::SessionExpired | PublishError::NoValidCookies)
                    if credential.username.is_some() && credential.password.is_some() =>
                {
                    debug!(target = "listbridge.poshmark", "cookie_session_stale_falling_back");
                }
                Err(err) => return Err(err),
            }
        } else if credential.username.is_none() || credential.password.is_none() {
            return Err(PublishError::NoValidCookies);
        }
        self.password_login(page, user_id, credential).await
    }

    async fn cookie_login(
        &self,
        page: &Page,
        credential: &MarketplaceCredential,
    ) -> Result<(), PublishError> {
        let stored = credential.cookies.as_deref().unwrap_or(&[]);
        let now = Utc::now().timestamp() as f64;
        let params = filter_cookies(stored, now, &self.config.base_url);
        if params.is_empty() {
            return Err(PublishError::NoValidCookies);
        }
        page.set_cookies(params).await?;

        self.goto(page, &self.config.feed_url()).await?;
        let content = page.content().await?;
        if looks_blocked(&content) {
            return Err(PublishError::BotBlocked);
        }
        if self.find_first(page, &AUTH_MARKER_SELECTORS).await.is_none() {
            return Err(PublishError::SessionExpired);
        }
        debug!(target = "listbridge.poshmark", "cookie_session_established");
        Ok(())
    }

    async fn password_login(
        &self,
        page: &Page,
        user_id: i64,
        credential: &MarketplaceCredential,
    ) -> Result<(), PublishError> {
        let username = credential.username.as_deref().ok_or(PublishError::NotConnected)?;
        let password = credential.password.as_deref().ok_or(PublishError::NotConnected)?;

        self.goto(page, &self.config.login_url()).await?;
        let content = page.content().await?;
        if looks_blocked(&content) {
            return Err(PublishError::BotBlocked);
        }

        let mut email_field = self.find_first(page, &EMAIL_SELECTORS).await;
        if email_field.is_none() {
            // Some entry pages hide the form behind a "Log in" link.
            if let Ok(links) = page.find_xpath("//a[contains(., 'Log in')]").await {
                let _ = links.click().await;
                tokio::time::sleep(self.config.settle_delay).await;
                email_field = self.find_first(page, &EMAIL_SELECTORS).await;
            }
        }
        let email_field = email_field.ok_or(PublishError::LoginFormNotFound)?;
        email_field.click().await?;
        email_field.type_str(username).await?;

        let password_field = self
            .find_first(page, &["input[type=\"password\"]"])
            .await
            .ok_or(PublishError::LoginFormNotFound)?;
        password_field.click().await?;
        password_field.type_str(password).await?;

        let submit = self
            .find_first(page, &["button[type=\"submit\"]", "input[type=\"submit\"]"])
            .await
            .ok_or(PublishError::LoginFormNotFound)?;
        submit.click().await?;

        // Success is observed as the page leaving /login within the window.
        let deadline = Instant::now() + self.config.login_timeout;
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let url = page.url().await?.unwrap_or_default();
            if !url.to_lowercase().contains("/login") {
                break;
            }
            if Instant::now() >= deadline {
                if let Some(reason) = self.inline_error(page).await {
                    return Err(PublishError::LoginFailed(reason));
                }
                return Err(PublishError::LoginFailed(
                    "login page did not advance".into(),
                ));
            }
        }

        self.persist_refreshed_jar(page, user_id, credential).await;
        info!(target = "listbridge.poshmark", user_id, "password_login_succeeded");
        Ok(())
    }

    /// Capture the live jar after a form login so the next session can take
    /// the cookie path. Persistence failures are logged, not fatal.
    async fn persist_refreshed_jar(
        &self,
        page: &Page,
        user_id: i64,
        credential: &MarketplaceCredential,
    ) {
        let cookies = match page.get_cookies().await {
            Ok(cookies) => cookies,
            Err(err) => {
                warn!(target = "listbridge.poshmark", error = %err, "cookie_capture_failed");
                return;
            }
        };
        let mut refreshed = credential.clone();
        refreshed.cookies = Some(
            cookies
                .into_iter()
                .map(|cookie| StoredCookie {
                    name: cookie.name,
                    value: cookie.value,
                    domain: Some(cookie.domain),
                    path: Some(cookie.path),
                    secure: cookie.secure,
                    http_only: cookie.http_only,
                    same_site: cookie.same_site.map(|s| same_site_name(&s).to_string()),
                    expires_at: None,
                })
                .collect(),
        );
        if let Err(err) = self
            .store
            .save_credential(user_id, Marketplace::Poshmark, refreshed)
            .await
        {
            warn!(target = "listbridge.poshmark", error = %err, "cookie_persist_failed");
        }
    }

    pub(crate) async fn goto(&self, page: &Page, url: &str) -> Result<(), PublishError> {
        tokio::time::timeout(self.config.navigation_timeout, page.goto(url))
            .await
            .map_err(|_| PublishError::Browser(format!("navigation to {url} timed out")))??;
        let _ = tokio::time::timeout(self.config.navigation_timeout, page.wait_for_navigation())
            .await;
        Ok(())
    }

    /// Probe the candidate list repeatedly until one attaches or the
    /// selector timeout runs out. Client-rendered pages routinely attach
    /// form elements well after navigation settles.
    pub(crate) async fn find_first(&self, page: &Page, selectors: &[&str]) -> Option<Element> {
        poll_until(self.config.selector_timeout, SELECTOR_POLL, move || async move {
            for selector in selectors {
                if let Ok(element) = page.find_element(*selector).await {
                    return Some(element);
                }
            }
            None
        })
        .await
    }

    async fn inline_error(&self, page: &Page) -> Option<String> {
        for selector in INLINE_ERROR_SELECTORS {
            if let Ok(element) = page.find_element(selector).await {
                if let Ok(Some(text)) = element.inner_text().await {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
            }
        }
        None
    }
}

/// Repeat an async probe until it yields a value or the deadline passes.
/// The probe always runs at least once.
pub(crate) async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = probe().await {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn teardown(mut browser: Browser, handler: JoinHandle<()>) {
    if let Err(err) = browser.close().await {
        warn!(target = "listbridge.poshmark", error = %err, "browser_close_failed");
    }
    let _ = browser.wait().await;
    handler.abort();
}

/// Convert the stored jar into cookie params the browser accepts: expired
/// and nameless/valueless entries are dropped, a leading domain dot is
/// stripped, and unknown same-site values are omitted rather than guessed.
pub(crate) fn filter_cookies(
    stored: &[StoredCookie],
    now_epoch: f64,
    fallback_url: &str,
) -> Vec<CookieParam> {
    stored
        .iter()
        .filter(|cookie| !cookie.name.trim().is_empty() && !cookie.value.trim().is_empty())
        .filter(|cookie| cookie.expires_at.map(|at| at > now_epoch).unwrap_or(true))
        .filter_map(|cookie| {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone());
            match cookie.domain.as_deref().map(|d| d.trim_start_matches('.')) {
                Some(domain) if !domain.is_empty() => builder = builder.domain(domain),
                _ => builder = builder.url(fallback_url),
            }
            if let Some(path) = &cookie.path {
                builder = builder.path(path.clone());
            }
            builder = builder.secure(cookie.secure).http_only(cookie.http_only);
            if let Some(same_site) = cookie.same_site.as_deref().and_then(parse_same_site) {
                builder = builder.same_site(same_site);
            }
            if let Some(expires) = cookie.expires_at {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            builder.build().ok()
        })
        .collect()
}

fn parse_same_site(raw: &str) -> Option<CookieSameSite> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" | "no_restriction" => Some(CookieSameSite::None),
        _ => Option::None,
    }
}

fn same_site_name(same_site: &CookieSameSite) -> &'static str {
    match same_site {
        CookieSameSite::Strict => "strict",
        CookieSameSite::Lax => "lax",
        CookieSameSite::None => "none",
    }
}

/// Bot-defense interstitials look nothing like the app; a handful of phrases
/// identifies them reliably.
pub(crate) fn looks_blocked(html: &str) -> bool {
    let html = html.to_lowercase();
    ["access denied", "captcha", "verify you are human", "just a moment", "px-captcha"]
        .iter()
        .any(|marker| html.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str, expires_at: Option<f64>) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: value.into(),
            domain: Some(".poshmark.com".into()),
            path: Some("/".into()),
            secure: true,
            http_only: false,
            same_site: Some("lax".into()),
            expires_at,
        }
    }

    #[test]
    fn expired_and_empty_cookies_are_dropped() {
        let now = 1_700_000_000.0;
        let mut jar: Vec<StoredCookie> = (0..6)
            .map(|i| cookie(&format!("keep{i}"), "v", Some(now + 3600.0)))
            .collect();
        jar.push(cookie("dead1", "v", Some(now - 1.0)));
        jar.push(cookie("dead2", "v", Some(now - 500.0)));
        jar.push(cookie("dead3", "v", Some(now)));
        jar.push(cookie("empty", "", None));

        let params = filter_cookies(&jar, now, "https://poshmark.com");
        assert_eq!(params.len(), 6);
        assert!(params.iter().all(|p| p.name.starts_with("keep")));
    }

    #[test]
    fn leading_domain_dot_is_stripped() {
        let params = filter_cookies(
            &[cookie("ui", "x", None)],
            0.0,
            "https://poshmark.com",
        );
        assert_eq!(params[0].domain.as_deref(), Some("poshmark.com"));
    }

    #[test]
    fn unknown_same_site_is_omitted() {
        let mut c = cookie("ui", "x", None);
        c.same_site = Some("weird".into());
        let params = filter_cookies(&[c], 0.0, "https://poshmark.com");
        assert!(params[0].same_site.is_none());
    }

    #[test]
    fn session_cookies_without_expiry_survive() {
        let mut c = cookie("_session", "abc", None);
        c.domain = None;
        let params = filter_cookies(&[c], 1e12, "https://poshmark.com");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].url.as_deref(), Some("https://poshmark.com"));
    }

    #[tokio::test]
    async fn selector_polling_retries_until_the_element_appears() {
        let calls = std::cell::Cell::new(0u32);
        let found = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
            let attempt = calls.get();
            calls.set(attempt + 1);
            async move { (attempt >= 3).then_some(attempt) }
        })
        .await;
        assert_eq!(found, Some(3));
    }

    #[tokio::test]
    async fn selector_polling_gives_up_at_the_deadline() {
        let calls = std::cell::Cell::new(0u32);
        let found: Option<()> =
            poll_until(Duration::from_millis(40), Duration::from_millis(5), || {
                calls.set(calls.get() + 1);
                async { None }
            })
            .await;
        assert!(found.is_none());
        assert!(calls.get() > 1, "a single-shot query defeats the bounded wait");
    }

    #[test]
    fn interstitial_markers_are_recognized() {
        assert!(looks_blocked("<html><title>Access Denied</title></html>"));
        assert!(looks_blocked("<div id=\"px-captcha\"></div>"));
        assert!(!looks_blocked("<html><title>Feed</title></html>"));
    }
}
