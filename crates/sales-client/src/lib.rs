use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use sales_types::ports::api_transport::{
    ApiRequest, ApiResponse, ApiTransport, Method, TransportError,
};

#[derive(Clone)]
pub struct SalesClientBuilder {
    base: Url,
    headers: HeaderMap,
}

/// reqwest-backed transport. The cookie store keeps the login and
/// active-tenant cookies for every later call made through the same client.
#[derive(Clone)]
pub struct SalesClient {
    base: Url,
    client: reqwest::Client,
}

impl SalesClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::builder(base_url)?.build()
    }

    pub fn builder(base_url: &str) -> anyhow::Result<SalesClientBuilder> {
        let mut base = Url::parse(base_url).context("invalid base url")?;
        // Url::join drops the last segment unless the path ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(SalesClientBuilder {
            base,
            headers: HeaderMap::new(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("bad path `{path}`: {e}")))
    }
}

#[async_trait]
impl ApiTransport for SalesClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, path = %request.path, "sending request");
        let res = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            "received response"
        );
        Ok(ApiResponse { status, body })
    }
}

impl SalesClientBuilder {
    pub fn with_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let header_name =
            HeaderName::from_bytes(key.as_ref().as_bytes()).context("invalid header name")?;
        let header_value = HeaderValue::from_str(value.as_ref()).context("invalid header value")?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn build(self) -> anyhow::Result<SalesClient> {
        let mut builder = reqwest::Client::builder().cookie_store(true);
        if !self.headers.is_empty() {
            builder = builder.default_headers(self.headers);
        }
        let client = builder.build().context("failed to build http client")?;
        Ok(SalesClient {
            base: self.base,
            client,
        })
    }
}
