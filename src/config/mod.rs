//! Configuration resolved from the environment.
//!
//! Values come from process environment variables. Call [`load_dotenv`]
//! first if a `.env` file in the working directory should be honored.

mod engine;
pub(crate) mod helpers;

pub(crate) use engine::DOCKER_HOST_SCHEMES;
pub use engine::EngineConfig;

/// Load a `.env` file from the current directory (or its parents) if present.
///
/// Existing environment variables are never overwritten. Missing files are
/// not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env: {}", e),
    }
}
