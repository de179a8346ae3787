use crate::{
    driver::BackoffPolicy,
    error::UploadError,
    factory::HandleFactory,
    headers::HeaderMap,
    options::UploadOptions,
    session::UploadSession,
    transfer::RequestConfig,
};
use std::sync::Arc;
use url::Url;

/// The user agent sent when the caller does not provide one.
pub const DEFAULT_USER_AGENT: &str = concat!("chunkup/", env!("CARGO_PKG_VERSION"));

/// Collects the pieces of an upload request and opens the session.
///
/// Nothing is validated until [`open`](Self::open), which reports the first
/// problem as a configuration error.
pub struct UploadRequestBuilder<F: HandleFactory> {
    factory: Arc<F>,
    destination: String,
    method: Option<String>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    user_agent_prefixes: Vec<String>,
    user_agent: Option<String>,
    options: UploadOptions,
}

impl<F: HandleFactory> UploadRequestBuilder<F> {
    pub fn new(factory: Arc<F>, destination: impl Into<String>) -> Self {
        Self {
            factory,
            destination: destination.into(),
            method: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            user_agent_prefixes: Vec::new(),
            user_agent: None,
            options: UploadOptions::default(),
        }
    }

    /// Overrides the default `POST`.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets a header, replacing any earlier value with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a percent-encoded query parameter to the destination.
    pub fn query_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Prepends `prefix` to the user agent. Prefixes appear in the order they
    /// were added.
    pub fn user_agent_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.user_agent_prefixes.push(prefix.into());
        self
    }

    /// Replaces the default user agent. Prefixes still apply.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn initial_buffer_size(mut self, size: usize) -> Self {
        self.options.initial_buffer_size = size;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.options.backoff = backoff;
        self
    }

    /// Traces every increment of the session's wait loop.
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.options.logging_enabled = enabled;
        self
    }

    pub fn options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the request without opening a session.
    pub fn build_request(&self) -> Result<RequestConfig, UploadError> {
        let mut destination = Url::parse(&self.destination).map_err(crate::ConfigError::from)?;
        if !self.query.is_empty() {
            destination
                .query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let base = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = self
            .user_agent_prefixes
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(base))
            .collect::<Vec<_>>()
            .join(" ");

        let mut request =
            RequestConfig::from_url(destination, user_agent)?.with_headers(self.headers.clone())?;
        if let Some(method) = &self.method {
            request = request.with_method(method.as_str())?;
        }
        Ok(request)
    }

    /// Validates the request and opens the session.
    pub fn open(self) -> Result<UploadSession<F>, UploadError> {
        let request = self.build_request()?;
        UploadSession::open_request(self.factory, request, self.options)
    }
}
