//! Client configuration for the GCS backend.
//!
//! Options are plain values with `Default` and consuming `with_*` setters.
//! [`GcsClientOptions::from_env`] layers `FLEET_GCS_*` environment variables
//! over the defaults.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::Redacted;

/// Default JSON API endpoint.
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Options for the underlying storage client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcsClientOptions {
    /// Endpoint override (emulators, private service connect).
    pub endpoint: Option<String>,
    /// Send requests without credentials.
    pub anonymous: bool,
    /// Project billed for requester-pays buckets.
    pub user_project: Option<String>,
    /// Static bearer token used instead of application default credentials.
    pub access_token: Option<Redacted<String>>,
    /// Per-request timeout. Unset means no implicit timeout.
    pub request_timeout: Option<Duration>,
}

impl GcsClientOptions {
    /// Sets the endpoint override.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Enables or disables anonymous access.
    #[must_use]
    pub const fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Sets the requester-pays billing project.
    #[must_use]
    pub fn with_user_project(mut self, project: impl Into<String>) -> Self {
        self.user_project = Some(project.into());
        self
    }

    /// Sets a static access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(Redacted(token.into()));
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The effective endpoint, without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GCS_ENDPOINT)
            .trim_end_matches('/')
    }

    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the endpoint is not an http(s) URL,
    /// if anonymous mode is combined with a static token, or if the timeout
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(Error::InvalidArgument(format!(
                "endpoint must be an http(s) URL (got {endpoint})"
            )));
        }
        if self.anonymous && self.access_token.is_some() {
            return Err(Error::InvalidArgument(
                "anonymous access cannot be combined with an access token".into(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidArgument(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Loads options from `FLEET_GCS_*` environment variables.
    ///
    /// - `FLEET_GCS_ENDPOINT`
    /// - `FLEET_GCS_ANONYMOUS` (`true`/`false`/`1`/`0`)
    /// - `FLEET_GCS_USER_PROJECT`
    /// - `FLEET_GCS_ACCESS_TOKEN`
    /// - `FLEET_GCS_REQUEST_TIMEOUT_SECS`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads options through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let mut options = Self {
            endpoint: get("FLEET_GCS_ENDPOINT"),
            user_project: get("FLEET_GCS_USER_PROJECT"),
            access_token: get("FLEET_GCS_ACCESS_TOKEN").map(Redacted),
            ..Self::default()
        };
        if let Some(v) = get("FLEET_GCS_ANONYMOUS") {
            options.anonymous = parse_bool("FLEET_GCS_ANONYMOUS", &v)?;
        }
        if let Some(v) = get("FLEET_GCS_REQUEST_TIMEOUT_SECS") {
            let secs = v.parse::<u64>().map_err(|e| {
                Error::InvalidArgument(format!("FLEET_GCS_REQUEST_TIMEOUT_SECS must be a u64: {e}"))
            })?;
            options.request_timeout = Some(Duration::from_secs(secs));
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidArgument(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = GcsClientOptions::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(options.endpoint(), DEFAULT_GCS_ENDPOINT);
        assert!(!options.anonymous);
        assert!(options.request_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let options = GcsClientOptions::from_lookup(lookup(&[
            ("FLEET_GCS_ENDPOINT", "http://localhost:4443/"),
            ("FLEET_GCS_ANONYMOUS", "yes"),
            ("FLEET_GCS_USER_PROJECT", "billing-proj"),
            ("FLEET_GCS_REQUEST_TIMEOUT_SECS", "45"),
        ]))
        .expect("parse");

        assert_eq!(options.endpoint(), "http://localhost:4443");
        assert!(options.anonymous);
        assert_eq!(options.user_project.as_deref(), Some("billing-proj"));
        assert_eq!(options.request_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let options =
            GcsClientOptions::from_lookup(lookup(&[("FLEET_GCS_ENDPOINT", "   ")])).expect("parse");
        assert!(options.endpoint.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(GcsClientOptions::from_lookup(lookup(&[("FLEET_GCS_ANONYMOUS", "maybe")])).is_err());
        assert!(
            GcsClientOptions::from_lookup(lookup(&[("FLEET_GCS_REQUEST_TIMEOUT_SECS", "soon")]))
                .is_err()
        );
        assert!(
            GcsClientOptions::from_lookup(lookup(&[("FLEET_GCS_ENDPOINT", "localhost:4443")]))
                .is_err()
        );
        assert!(
            GcsClientOptions::from_lookup(lookup(&[
                ("FLEET_GCS_ANONYMOUS", "true"),
                ("FLEET_GCS_ACCESS_TOKEN", "ya29.x"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn test_access_token_is_redacted_in_debug() {
        let options = GcsClientOptions::default().with_access_token("ya29.secret");
        assert!(!format!("{options:?}").contains("ya29.secret"));
    }
}
