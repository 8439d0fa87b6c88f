//! HTTP communication protocol
//!
//! TigerStyle: Explicit request assembly, explicit security gate.

use super::auth::OAuth2TokenCache;
use super::{HttpCallTemplate, CALL_TEMPLATE_TYPE, HTTP_URL_BYTES_MAX};
use crate::document::{manual_from_document, DocumentFormat};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use utcp_core::{
    ApiKeyLocation, Auth, CallTemplate, CommunicationProtocol, Error, ProtocolCaller,
    RegisterManualResult, Result,
};

static PATH_PARAMETER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}/]+)\}").expect("path parameter pattern is a valid regex"));

/// Stringify an argument for headers, paths and query strings
fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn percent_encode(value: &str) -> String {
    // form encoding writes spaces as '+', paths need %20; a literal '+' is already %2B
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Reject plaintext URLs that do not point at the local machine
pub(crate) fn ensure_secure_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::validation("url", e.to_string()))?;
    let local = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if local => Ok(()),
        _ => Err(Error::validation(
            "url",
            format!(
                "security error: URL must use HTTPS or point to localhost/127.0.0.1, got {}",
                raw
            ),
        )),
    }
}

/// Fill `{param}` placeholders from `args`, removing the consumed arguments
fn build_url(template_url: &str, args: &mut Map<String, Value>) -> Result<String> {
    let mut missing = Vec::new();
    let url = PATH_PARAMETER.replace_all(template_url, |caps: &Captures<'_>| {
        let name = &caps[1];
        match args.remove(name) {
            Some(value) => percent_encode(&arg_to_string(&value)),
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::validation(
            "path",
            format!("missing required path parameter(s): {}", missing.join(", ")),
        ));
    }
    if PATH_PARAMETER.is_match(&url) {
        return Err(Error::validation(
            "path",
            format!("unfilled path placeholder in {}", url),
        ));
    }
    if url.len() > HTTP_URL_BYTES_MAX {
        return Err(Error::validation(
            "url",
            format!("resolved URL exceeds {} bytes", HTTP_URL_BYTES_MAX),
        ));
    }
    Ok(url.into_owned())
}

/// HTTP transport
pub struct HttpCommunicationProtocol {
    client: Client,
    tokens: OAuth2TokenCache,
}

impl Default for HttpCommunicationProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCommunicationProtocol {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            tokens: OAuth2TokenCache::new(),
        }
    }

    /// Assemble a request with auth applied
    async fn request(
        &self,
        template: &HttpCallTemplate,
        url: &str,
        mut headers: HashMap<String, String>,
        mut query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<reqwest::RequestBuilder> {
        let mut cookies = Vec::new();
        let mut basic = None;
        let mut bearer = None;

        match &template.auth {
            Some(Auth::ApiKey(key)) => match key.location {
                ApiKeyLocation::Header => {
                    headers.insert(key.var_name.clone(), key.api_key.clone());
                }
                ApiKeyLocation::Query => query.push((key.var_name.clone(), key.api_key.clone())),
                ApiKeyLocation::Cookie => cookies.push(format!("{}={}", key.var_name, key.api_key)),
            },
            Some(Auth::Basic(b)) => basic = Some((b.username.clone(), b.password.clone())),
            Some(Auth::OAuth2(oauth)) => {
                bearer = Some(self.tokens.get_token(&self.client, oauth).await?);
            }
            None => {}
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::validation("headers", format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::validation("headers", format!("{}: {}", name, e)))?;
            header_map.insert(name, value);
        }
        if !cookies.is_empty() {
            let value = HeaderValue::from_str(&cookies.join("; "))
                .map_err(|e| Error::validation("auth", e.to_string()))?;
            header_map.insert(COOKIE, value);
        }

        let mut request = self
            .client
            .request(template.http_method.as_reqwest(), url)
            .timeout(Duration::from_millis(template.timeout_ms))
            .headers(header_map);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some((username, password)) = basic {
            request = request.basic_auth(username, Some(password));
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        if let Some(body) = body {
            request = if template.content_type.contains("json") {
                request.json(&body)
            } else {
                let text = match body {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                request
                    .header(CONTENT_TYPE, template.content_type.as_str())
                    .body(text)
            };
        }
        Ok(request)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::transport(CALL_TEMPLATE_TYPE, format!("request timed out: {}", e))
            } else {
                Error::transport(CALL_TEMPLATE_TYPE, format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(
                CALL_TEMPLATE_TYPE,
                format!("HTTP {} error: {}", status.as_u16(), body),
            ));
        }
        Ok(response)
    }

    async fn discover(
        &self,
        template: &HttpCallTemplate,
        manual_name: &str,
    ) -> Result<utcp_core::UtcpManual> {
        let request = self
            .request(template, &template.url, template.headers.clone(), Vec::new(), None)
            .await?;
        let response = self.send(request).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(CALL_TEMPLATE_TYPE, e.to_string()))?;

        let document = DocumentFormat::detect(content_type.as_deref(), &template.url).parse(&text)?;
        manual_from_document(document, &template.url, manual_name)
    }
}

#[async_trait]
impl CommunicationProtocol for HttpCommunicationProtocol {
    fn protocol_name(&self) -> &str {
        CALL_TEMPLATE_TYPE
    }

    async fn register_manual(
        &self,
        _caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<RegisterManualResult> {
        let template: HttpCallTemplate = manual_call_template.parse_as()?;
        ensure_secure_url(&template.url)?;

        let manual_name = template.name.clone().unwrap_or_default();
        info!(manual = %manual_name, url = %template.url, "Discovering HTTP manual");

        match self.discover(&template, &manual_name).await {
            Ok(manual) => {
                debug!(manual = %manual_name, tools = manual.tools.len(), "HTTP manual discovered");
                Ok(RegisterManualResult::success(manual_call_template.clone(), manual))
            }
            Err(e) => {
                warn!(manual = %manual_name, error = %e, "HTTP manual discovery failed");
                Ok(RegisterManualResult::failure(
                    manual_call_template.clone(),
                    vec![e.to_string()],
                ))
            }
        }
    }

    async fn deregister_manual(
        &self,
        _caller: &dyn ProtocolCaller,
        _manual_call_template: &CallTemplate,
    ) -> Result<()> {
        Ok(())
    }

    async fn call_tool(
        &self,
        _caller: &dyn ProtocolCaller,
        tool_name: &str,
        args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<Value> {
        let template: HttpCallTemplate = tool_call_template.parse_as()?;
        let mut remaining = args.clone();

        let mut headers = template.headers.clone();
        for field in &template.header_fields {
            if let Some(value) = remaining.remove(field) {
                headers.insert(field.clone(), arg_to_string(&value));
            }
        }

        let body = template
            .body_field
            .as_ref()
            .and_then(|field| remaining.remove(field));

        let url = build_url(&template.url, &mut remaining)?;
        let query: Vec<(String, String)> = remaining
            .iter()
            .map(|(k, v)| (k.clone(), arg_to_string(v)))
            .collect();

        debug!(tool = %tool_name, method = %template.http_method, url = %url, "Calling HTTP tool");
        let request = self.request(&template, &url, headers, query, body).await?;
        let response = self.send(request).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(CALL_TEMPLATE_TYPE, e.to_string()))?;

        if is_json {
            if let Ok(value) = serde_json::from_str(&text) {
                return Ok(value);
            }
        }
        Ok(Value::String(text))
    }

    async fn close(&self) -> Result<()> {
        self.tokens.clear().await;
        Ok(())
    }
}
