pub mod analyzer;
pub mod backends;
pub mod loader;
