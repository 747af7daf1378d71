//! Configuration validation

use super::*;
use crate::error::{Result, ServerError};

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_backend_config(&config.backend)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validate server configuration
fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        return Err(ServerError::Config(
            "Server host cannot be empty".to_string()
        ));
    }

    if config.drain_timeout_secs > 300 {
        return Err(ServerError::Config(
            "Drain timeout too large (max: 300 seconds)".to_string()
        ));
    }

    if config.grace_margin_ms > 60_000 {
        return Err(ServerError::Config(
            "Grace margin too large (max: 60000 ms)".to_string()
        ));
    }

    if config.max_body_size_mb > 100 {
        return Err(ServerError::Config(
            "Max body size too large (max: 100 MB)".to_string()
        ));
    }

    Ok(())
}

/// Validate backend configuration
fn validate_backend_config(config: &BackendConfig) -> Result<()> {
    if config.timeout_secs == 0 {
        return Err(ServerError::Config(
            "Backend timeout must be greater than 0".to_string()
        ));
    }

    if config.timeout_secs > 300 {
        return Err(ServerError::Config(
            "Backend timeout too large (max: 300 seconds)".to_string()
        ));
    }

    match config.kind {
        BackendKind::Remote => {
            if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
                return Err(ServerError::Config(
                    "Backend URL must start with http:// or https://".to_string()
                ));
            }

            if config.max_retries > 10 {
                return Err(ServerError::Config(
                    "Max retries too large (max: 10)".to_string()
                ));
            }
        }
        BackendKind::Random => {
            if config.dimension == 0 {
                return Err(ServerError::Config(
                    "Random backend dimension must be greater than 0".to_string()
                ));
            }
        }
        BackendKind::Stub => {}
    }

    if config.cache_enabled {
        if config.cache_size == 0 {
            return Err(ServerError::Config(
                "Cache size must be greater than 0 when cache is enabled".to_string()
            ));
        }

        if config.cache_ttl_secs == 0 {
            return Err(ServerError::Config(
                "Cache TTL must be greater than 0 when cache is enabled".to_string()
            ));
        }
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    match config.format.as_str() {
        "json" | "compact" | "pretty" => Ok(()),
        other => Err(ServerError::Config(format!(
            "Unknown log format '{}' (expected json, compact or pretty)",
            other
        ))),
    }
}
