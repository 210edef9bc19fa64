use thiserror::Error;

/// Terminal failures surfaced by the publish and scrape paths.
///
/// Every variant is terminal for the attempt that raised it; the
/// [`Remediation`] hint tells an operator which lever to pull. Response
/// bodies from the remote marketplace are preserved verbatim for diagnosis.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("marketplace account not connected")]
    NotConnected,
    #[error("token refresh rejected: HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },
    #[error("authorization-code exchange rejected: HTTP {status}: {body}")]
    ConnectFailed { status: u16, body: String },
    #[error("no refresh token stored for account")]
    NoRefreshToken,
    #[error("seller policies missing and could not be created")]
    MissingPolicies,
    #[error("inventory item create failed: HTTP {status}: {body}")]
    InventoryCreateFailed { status: u16, body: String },
    #[error("offer create failed: HTTP {status}: {body}")]
    OfferCreateFailed { status: u16, body: String },
    #[error("offer publish failed: HTTP {status}: {body}")]
    PublishFailed { status: u16, body: String },
    #[error("inventory query failed: HTTP {status}: {body}")]
    InventoryQueryFailed { status: u16, body: String },
    #[error("inventory item delete failed: HTTP {status}: {body}")]
    InventoryDeleteFailed { status: u16, body: String },
    #[error("bot-defense interstitial served instead of the requested page")]
    BotBlocked,
    #[error("listing form not present on the creation page")]
    FormNotFound,
    #[error("login form not found on the login page")]
    LoginFormNotFound,
    #[error("login submitted but rejected: {0}")]
    LoginFailed(String),
    #[error("stored browser session no longer authenticated")]
    SessionExpired,
    #[error("no stored cookies survived filtering")]
    NoValidCookies,
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("browser automation error: {0}")]
    Browser(String),
    #[error("credential/link store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Which kind of operator action clears the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Re-run the connect flow for the marketplace account.
    Reconnect,
    /// Complete seller-side configuration (policies, location).
    FixConfiguration,
    /// The remote marketplace rejected the payload; inspect the body.
    InspectResponse,
    /// Automated access is being challenged; wait before retrying.
    WaitAndRetry,
    /// The marketplace page layout likely changed; update selectors.
    InvestigateLayout,
    /// Infrastructure-level failure (network, browser, storage).
    Infrastructure,
}

impl PublishError {
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::NotConnected
            | Self::NoRefreshToken
            | Self::RefreshFailed { .. }
            | Self::ConnectFailed { .. }
            | Self::SessionExpired
            | Self::NoValidCookies
            | Self::LoginFailed(_) => Remediation::Reconnect,
            Self::MissingPolicies => Remediation::FixConfiguration,
            Self::InventoryCreateFailed { .. }
            | Self::OfferCreateFailed { .. }
            | Self::PublishFailed { .. }
            | Self::InventoryQueryFailed { .. }
            | Self::InventoryDeleteFailed { .. } => Remediation::InspectResponse,
            Self::BotBlocked => Remediation::WaitAndRetry,
            Self::FormNotFound | Self::LoginFormNotFound => Remediation::InvestigateLayout,
            Self::Transport(_) | Self::Browser(_) | Self::Store(_) => Remediation::Infrastructure,
        }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for PublishError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(err.to_string())
    }
}
