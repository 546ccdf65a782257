// src/utils/env.rs
use log::{debug, info, warn};
use std::env;

/// Loads `.env` (or the file named by `ENV_FILE`) without overriding variables that are
/// already set in the process environment.
pub fn load_env() {
    let result = match env::var("ENV_FILE") {
        Ok(path) => {
            info!("Loading environment variables from: {}", path);
            dotenv::from_filename(&path)
        }
        Err(_) => dotenv::dotenv(),
    };
    match result {
        Ok(path) => debug!("Environment file processed: {}", path.display()),
        Err(e) => warn!(
            "Could not load env file: {}. Proceeding with system environment variables.",
            e
        ),
    }
}
