//! REST-marketplace path: token lifecycle, authenticated gateway, seller
//! policy resolution, and the inventory → offer → publish pipeline.

pub mod auth;
pub mod gateway;
pub mod policies;
pub mod publish;

pub use auth::TokenRefresher;
pub use gateway::{ApiResponse, RestApiGateway};
pub use policies::PolicyResolver;
pub use publish::{InventoryItemSummary, PublishPipeline, SyncReport};
