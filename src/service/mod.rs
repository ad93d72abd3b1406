//! Service layer for the referral exchange
//!
//! This module contains the event dispatcher, the main application state,
//! and health checking for the production service.

pub mod app;
pub mod dispatcher;
pub mod health;

pub use app::{AppState, ServiceError};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use health::{HealthCheck, HealthContext, HealthStatus};
