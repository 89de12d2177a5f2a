mod google_key_source;

pub use google_key_source::*;
