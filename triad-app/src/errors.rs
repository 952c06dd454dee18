//! Error types for the command-line front end.

use std::error::Error as _;
use thiserror::Error;
use triad_train::SceneError;
use triad_train::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Missing {0}: pass it on the command line or in the config file")]
    MissingArgument(&'static str),

    #[error("Invalid --load-iteration value {0}")]
    InvalidLoadIteration(i64),

    #[error("--load-iteration does not apply to '{0}'")]
    LoadIterationNotApplicable(&'static str),

    #[error("No part named '{0}'")]
    UnknownPart(String),
}

/// Error message followed by its source chain.
pub fn report(error: &AppError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
