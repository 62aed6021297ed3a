pub mod check;
pub mod crawl;
pub mod serve;

// Re-export command functions for convenience
pub use check::check_config;
pub use crawl::crawl;
pub use serve::serve;
