//! Configuration for talking to the AI inference service.
//!
//! All network behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`] or read from the environment with
//! [`ServiceConfig::from_env`]. The retry knobs are handed to each call as a
//! [`RetryPolicy`] value rather than attached to a shared HTTP client, so two
//! requests with different policies never observe each other's settings.

use crate::error::PhotoError;
use crate::progress::ProgressCallback;
use std::env;
use std::fmt;
use std::time::Duration;

/// Environment variable holding the AI service host name.
pub const ENV_HOST: &str = "AI_SERVICE_URL";
/// Environment variable holding the AI service port.
pub const ENV_PORT: &str = "AI_SERVICE_PORT";
/// Optional per-request timeout override, in seconds.
pub const ENV_TIMEOUT_SECS: &str = "IDPHOTO_TIMEOUT_SECS";
/// Optional retry budget override.
pub const ENV_MAX_RETRIES: &str = "IDPHOTO_MAX_RETRIES";

/// Connection and retry settings for the AI service.
///
/// # Example
/// ```rust
/// use idphoto_pipeline::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .host("10.0.0.12")
///     .port(8080)
///     .timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoint_url("idphoto"), "http://10.0.0.12:8080/idphoto");
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// URL scheme. Default: `http`.
    pub scheme: String,

    /// Host name or IP address of the AI service.
    pub host: String,

    /// TCP port of the AI service.
    pub port: u16,

    /// Timeout applied to every individual request. Default: 60 s.
    pub timeout: Duration,

    /// Additional attempts after a retryable failure. Default: 2 (3 total).
    pub max_retries: u32,

    /// Base of the exponential back-off. Default: 100 ms.
    ///
    /// The wait before retry `n` (1-based) is `retry_base_delay * 2^n`:
    /// 200 ms, then 400 ms.
    pub retry_base_delay: Duration,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(100),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read `AI_SERVICE_URL` / `AI_SERVICE_PORT` (required) plus the optional
    /// timeout and retry overrides.
    pub fn from_env() -> Result<Self, PhotoError> {
        let host = env::var(ENV_HOST)
            .map_err(|_| PhotoError::InvalidConfig(format!("{ENV_HOST} is not set")))?;
        let port = parse_var::<u16>(ENV_PORT)?
            .ok_or_else(|| PhotoError::InvalidConfig(format!("{ENV_PORT} is not set")))?;

        let mut builder = Self::builder().host(host).port(port);
        if let Some(secs) = parse_var::<u64>(ENV_TIMEOUT_SECS)? {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(n) = parse_var::<u32>(ENV_MAX_RETRIES)? {
            builder = builder.max_retries(n);
        }
        builder.build()
    }

    /// Full URL of a service endpoint, e.g. `http://host:port/idphoto`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}://{}:{}/{}", self.scheme, self.host, self.port, endpoint)
    }

    /// Snapshot of the retry knobs, handed to every outbound call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            timeout: self.timeout,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, PhotoError>
where
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PhotoError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
        _ => Ok(None),
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.scheme = scheme.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, PhotoError> {
        let c = &self.config;
        if c.host.trim().is_empty() {
            return Err(PhotoError::InvalidConfig("host must not be empty".into()));
        }
        if c.port == 0 {
            return Err(PhotoError::InvalidConfig("port must be non-zero".into()));
        }
        if c.timeout.is_zero() {
            return Err(PhotoError::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        if c.scheme != "http" && c.scheme != "https" {
            return Err(PhotoError::InvalidConfig(format!(
                "scheme must be http or https, got {:?}",
                c.scheme
            )));
        }
        Ok(self.config)
    }
}

/// Retry settings for one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one.
    pub max_retries: u32,
    /// Base of the exponential back-off.
    pub base_delay: Duration,
    /// Timeout for each individual attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Back-off before retry number `retry` (1-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Total attempts this policy permits.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ServiceConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = ServiceConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(60));
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn endpoint_url_is_assembled() {
        let c = ServiceConfig::builder()
            .host("ai.internal")
            .port(7860)
            .build()
            .unwrap();
        assert_eq!(
            c.endpoint_url("human_matting"),
            "http://ai.internal:7860/human_matting"
        );
    }

    #[test]
    fn build_rejects_empty_host() {
        let err = ServiceConfig::builder().host("  ").build().unwrap_err();
        assert!(matches!(err, PhotoError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_zero_port_and_timeout() {
        assert!(ServiceConfig::builder().port(0).build().is_err());
        assert!(ServiceConfig::builder()
            .timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    /// Tests that touch process env vars hold this lock.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Run `f` with exactly `vars` set among the service variables.
    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let keys = [ENV_HOST, ENV_PORT, ENV_TIMEOUT_SECS, ENV_MAX_RETRIES];
        for key in keys {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let out = f();
        for key in keys {
            env::remove_var(key);
        }
        out
    }

    #[test]
    fn from_env_requires_host_and_port() {
        let err = with_env(&[(ENV_PORT, "8080")], ServiceConfig::from_env).unwrap_err();
        assert!(
            matches!(&err, PhotoError::InvalidConfig(m) if m.contains(ENV_HOST)),
            "got {err:?}"
        );

        let err = with_env(&[(ENV_HOST, "ai.internal")], ServiceConfig::from_env).unwrap_err();
        assert!(
            matches!(&err, PhotoError::InvalidConfig(m) if m.contains(ENV_PORT)),
            "got {err:?}"
        );
    }

    #[test]
    fn from_env_rejects_unparseable_values() {
        for (key, raw) in [
            (ENV_PORT, "eighty"),
            (ENV_TIMEOUT_SECS, "-5"),
            (ENV_MAX_RETRIES, "lots"),
        ] {
            let mut vars = vec![(ENV_HOST, "ai.internal"), (ENV_PORT, "8080")];
            vars.retain(|(k, _)| *k != key);
            vars.push((key, raw));

            let err = with_env(&vars, ServiceConfig::from_env).unwrap_err();
            assert!(
                matches!(&err, PhotoError::InvalidConfig(m) if m.contains(key)),
                "{key}={raw}: got {err:?}"
            );
        }
    }

    #[test]
    fn from_env_applies_overrides() {
        let config = with_env(
            &[
                (ENV_HOST, "ai.internal"),
                (ENV_PORT, "7860"),
                (ENV_TIMEOUT_SECS, "15"),
                (ENV_MAX_RETRIES, "0"),
            ],
            ServiceConfig::from_env,
        )
        .unwrap();

        assert_eq!(config.endpoint_url("idphoto"), "http://ai.internal:7860/idphoto");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.retry_policy().max_attempts(), 1);

        let defaults = with_env(
            &[(ENV_HOST, "ai.internal"), (ENV_PORT, "7860"), (ENV_TIMEOUT_SECS, " ")],
            ServiceConfig::from_env,
        )
        .unwrap();
        assert_eq!(defaults.timeout, Duration::from_secs(60));
        assert_eq!(defaults.max_retries, 2);
    }

    #[test]
    fn build_rejects_unknown_scheme() {
        assert!(ServiceConfig::builder().scheme("ftp").build().is_err());
        assert!(ServiceConfig::builder().scheme("https").build().is_ok());
    }
}
