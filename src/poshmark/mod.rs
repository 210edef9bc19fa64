//! Browser-marketplace path: authenticated session management, the
//! form-driven listing publisher, and the closet inventory scraper.

pub mod inventory;
pub mod publish;
pub mod session;

pub use inventory::InventoryScraper;
pub use publish::AutomationPublisher;
pub use session::BrowserSessionManager;
