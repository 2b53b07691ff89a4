//! Backend configuration resolution

mod hash;
mod resolver;

pub use hash::{backend_fingerprint, content_hash};
pub use resolver::ConfigResolver;
