//! Shared helpers.
//!
//! Process bootstrap, retry backoff construction, and the clock seam.

pub mod bootstrap;
pub mod clock;
pub mod retry;
