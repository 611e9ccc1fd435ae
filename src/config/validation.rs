use super::models::{Config, StorageProvider};
use thiserror::Error;

/// Upper bound on accepted request bodies, whatever the config says
const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_payload_bytes ({actual}) exceeds limit of 64MB ({limit})")]
    PayloadSizeExceedsLimit { actual: u64, limit: u64 },

    #[error("max_image_bytes ({image}) must not exceed max_payload_bytes ({payload})")]
    ImageLargerThanPayload { image: u64, payload: u64 },

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Storage bucket must not be empty")]
    EmptyBucket,

    #[error("Retention TTL must be positive: {field} = {value}")]
    InvalidRetentionTTL { field: String, value: u32 },

    #[error("Sweep setting must be positive: {field}")]
    ZeroSweepSetting { field: &'static str },

    #[error("Sweep interval must be positive: {field}")]
    ZeroInterval { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_api_limits(config)?;
    validate_storage(config)?;
    validate_retention(config)?;
    validate_sweep(config)?;
    Ok(())
}

fn validate_api_limits(config: &Config) -> Result<(), ValidationError> {
    let api = &config.server.api;

    if api.max_payload_bytes.as_u64() > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::PayloadSizeExceedsLimit {
            actual: api.max_payload_bytes.as_u64(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    if api.max_image_bytes > api.max_payload_bytes {
        return Err(ValidationError::ImageLargerThanPayload {
            image: api.max_image_bytes.as_u64(),
            payload: api.max_payload_bytes.as_u64(),
        });
    }

    Ok(())
}

/// Validate storage credentials when provider is S3
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.bucket.trim().is_empty() {
        return Err(ValidationError::EmptyBucket);
    }

    if config.storage.provider == StorageProvider::S3
        && (config.storage.access_key.is_none() || config.storage.secret_key.is_none())
    {
        return Err(ValidationError::MissingS3Credentials);
    }

    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.post_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTTL {
            field: "post_ttl_days".to_string(),
            value: 0,
        });
    }
    Ok(())
}

fn validate_sweep(config: &Config) -> Result<(), ValidationError> {
    let sweep = &config.sweep;

    let counts = [
        ("prune_batch_size", sweep.prune_batch_size),
        ("remove_chunk_size", sweep.remove_chunk_size),
        ("remove_concurrency", sweep.remove_concurrency),
        ("prune_max_iterations", sweep.prune_max_iterations),
        ("drain_page_size", sweep.drain_page_size),
        ("drain_max_pages", sweep.drain_max_pages),
    ];
    if let Some((field, _)) = counts.iter().find(|(_, value)| *value == 0) {
        return Err(ValidationError::ZeroSweepSetting { field: *field });
    }

    // tokio intervals panic on a zero period
    if sweep.prune_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroInterval { field: "prune_interval" });
    }
    if sweep.drain_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroInterval { field: "drain_interval" });
    }

    Ok(())
}
