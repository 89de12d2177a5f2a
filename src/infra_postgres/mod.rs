mod refresh_session_store_pg;
mod user_repo_pg;

pub use refresh_session_store_pg::*;
pub use user_repo_pg::*;

mod util;

pub use util::apply_schema;
