mod auth_service;
mod provider_verifier;

pub use auth_service::*;
pub use provider_verifier::*;
