// store

mod refresh_session_store;
mod signing_key_source;

pub use refresh_session_store::*;
pub use signing_key_source::*;

// repo

mod user_repo;

pub use user_repo::*;

// time

mod clock;

pub use clock::*;
