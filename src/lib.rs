pub mod config;
pub mod persist;
pub mod playback;
pub mod queue;
pub mod scheduler;
pub mod scrobbler;
pub mod service;
pub mod session;
pub mod text_cleanup;

#[cfg(test)]
mod test_support;
