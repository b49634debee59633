use secrecy::Secret;
use url::Url;

use crate::errors::AppError;

/// Connection settings for the stream CDN. Every field is required; a
/// missing or malformed value aborts startup instead of letting a request
/// reach the CDN with an empty credential.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub base_url: Url,
    pub library_id: String,
    pub access_key: Secret<String>,
}

impl StreamConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let base_url = Url::parse(&required("STREAM_BASE_URL")?)?;
        let library_id = required("STREAM_LIBRARY_ID")?;
        let access_key = Secret::new(required("STREAM_ACCESS_KEY")?);

        Ok(Self {
            base_url,
            library_id,
            access_key,
        })
    }
}

fn required(name: &str) -> Result<String, AppError> {
    let value = std::env::var(name)
        .map_err(|e| AppError::Unexpected(anyhow::anyhow!(e).context(format!("{} must be set", name))))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", name)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_is_an_error() {
        std::env::remove_var("CASTIFY_TEST_MISSING");
        assert!(required("CASTIFY_TEST_MISSING").is_err());
    }

    #[test]
    fn blank_variable_is_an_error() {
        std::env::set_var("CASTIFY_TEST_BLANK", "   ");
        assert!(required("CASTIFY_TEST_BLANK").is_err());
    }
}
