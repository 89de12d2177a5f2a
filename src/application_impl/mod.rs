mod auth_service_impl;
mod provider_verifier_fake;
mod provider_verifier_google;
mod token_codec_jwt;

pub use auth_service_impl::*;
pub use provider_verifier_fake::*;
pub use provider_verifier_google::*;
pub use token_codec_jwt::*;
