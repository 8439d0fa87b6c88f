//! OpenAPI to UTCP manual conversion
//!
//! TigerStyle: One tool per operation, `$ref` resolution bounded by a visited set.
//!
//! Handles OpenAPI 3.x (`servers`, `components`, `requestBody`) and Swagger 2.0
//! (`host`/`basePath`, `definitions`, `in: body` parameters). Security schemes
//! become auth values whose secrets are `${VAR}` placeholders, resolved later
//! by variable substitution.

use super::{HttpCallTemplate, HttpMethod, HTTP_BODY_FIELD_DEFAULT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};
use utcp_core::{
    ApiKeyAuth, ApiKeyLocation, Auth, BasicAuth, Error, OAuth2Auth, Result, Tool, UtcpManual,
};

/// Maximum number of operations converted from one document
pub const OPENAPI_OPERATIONS_COUNT_MAX: usize = 10_000;

const OPERATION_KEYS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

static NON_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("identifier pattern is a valid regex"));

/// Converts an OpenAPI document into a manual
pub struct OpenApiConverter {
    spec: Value,
    spec_url: Option<String>,
    call_template_name: String,
}

impl OpenApiConverter {
    pub fn new(spec: Value, spec_url: Option<&str>, call_template_name: impl Into<String>) -> Self {
        Self {
            spec,
            spec_url: spec_url.map(str::to_string),
            call_template_name: call_template_name.into(),
        }
    }

    /// Produce one tool per operation
    pub fn convert(&self) -> Result<UtcpManual> {
        let paths = self
            .spec
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::discovery_format("OpenAPI document has no 'paths' object"))?;

        let base_url = self.base_url();
        let mut tools = Vec::new();

        for (path, path_item) in paths {
            let path_item = self.resolve(path_item);
            let path_parameters = path_item
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for key in OPERATION_KEYS {
                let Some(operation) = path_item.get(key) else {
                    continue;
                };
                let Some(method) = HttpMethod::from_operation_key(key) else {
                    continue;
                };
                if tools.len() >= OPENAPI_OPERATIONS_COUNT_MAX {
                    warn!(max = OPENAPI_OPERATIONS_COUNT_MAX, "OpenAPI operation limit reached");
                    break;
                }
                tools.push(self.convert_operation(
                    &base_url,
                    path,
                    method,
                    operation,
                    &path_parameters,
                )?);
            }
        }

        debug!(tools = tools.len(), base_url = %base_url, "Converted OpenAPI document");
        let mut manual = UtcpManual::new(tools);
        if let Some(version) = self
            .spec
            .pointer("/info/version")
            .and_then(Value::as_str)
        {
            manual.manual_version = version.to_string();
        }
        Ok(manual)
    }

    // =========================================================================
    // Base URL
    // =========================================================================

    fn base_url(&self) -> String {
        if let Some(server_url) = self.spec.pointer("/servers/0/url").and_then(Value::as_str) {
            if server_url.starts_with("http://") || server_url.starts_with("https://") {
                return server_url.trim_end_matches('/').to_string();
            }
            if let Some(origin) = self.spec_origin() {
                return format!("{}/{}", origin, server_url.trim_matches('/'))
                    .trim_end_matches('/')
                    .to_string();
            }
        }

        if let Some(host) = self.spec.get("host").and_then(Value::as_str) {
            let scheme = self
                .spec
                .pointer("/schemes/0")
                .and_then(Value::as_str)
                .unwrap_or("https");
            let base_path = self
                .spec
                .get("basePath")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return format!("{}://{}{}", scheme, host, base_path)
                .trim_end_matches('/')
                .to_string();
        }

        self.spec_origin().unwrap_or_default()
    }

    fn spec_origin(&self) -> Option<String> {
        let url = url::Url::parse(self.spec_url.as_deref()?).ok()?;
        let origin = url.origin();
        origin.is_tuple().then(|| origin.ascii_serialization())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn convert_operation(
        &self,
        base_url: &str,
        path: &str,
        method: HttpMethod,
        operation: &Value,
        path_parameters: &[Value],
    ) -> Result<Tool> {
        let name = operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let slug = NON_IDENTIFIER.replace_all(path, "_");
                format!("{}_{}", method.to_string().to_lowercase(), slug.trim_matches('_'))
            });

        let description = operation
            .get("summary")
            .or_else(|| operation.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tags: Vec<String> = operation
            .get("tags")
            .and_then(Value::as_array)
            .map(|t| t.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let (inputs, header_fields, has_body) = self.inputs(operation, path_parameters);
        let outputs = self.outputs(operation);

        let mut template = HttpCallTemplate::new(format!("{}{}", base_url, path))
            .with_name(self.call_template_name.clone())
            .with_method(method)
            .with_header_fields(header_fields);
        if !has_body {
            template.body_field = None;
        }
        if let Some(content_type) = self.request_content_type(operation) {
            template.content_type = content_type;
        }
        template.auth = self.auth(operation);

        Ok(Tool::new(name, template.to_call_template()?)
            .with_description(description)
            .with_tags(tags)
            .with_inputs(inputs)
            .with_outputs(outputs))
    }

    /// Input schema, header argument names and whether a body exists
    fn inputs(&self, operation: &Value, path_parameters: &[Value]) -> (Value, Vec<String>, bool) {
        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut header_fields = Vec::new();
        let mut has_body = false;

        // Operation-level parameters override path-level ones with the same name and location
        let mut parameters: Vec<Value> = Vec::new();
        let operation_parameters = operation
            .get("parameters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for param in path_parameters.iter().chain(operation_parameters.iter()) {
            let param = param.clone();
            let key = |p: &Value| (p.get("name").cloned(), p.get("in").cloned());
            parameters.retain(|existing| key(existing) != key(&param));
            parameters.push(param);
        }

        for param in &parameters {
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            let location = param.get("in").and_then(Value::as_str).unwrap_or("query");

            if location == "body" {
                let schema = param.get("schema").cloned().unwrap_or_else(|| json!({}));
                properties.insert(HTTP_BODY_FIELD_DEFAULT.to_string(), schema);
                if param.get("required").and_then(Value::as_bool).unwrap_or(false) {
                    required.push(HTTP_BODY_FIELD_DEFAULT.to_string());
                }
                has_body = true;
                continue;
            }

            let mut schema = match param.get("schema") {
                Some(s) => s.clone(),
                // Swagger 2.0 keeps the type on the parameter itself
                None => json!({"type": param.get("type").cloned().unwrap_or(json!("string"))}),
            };
            if let (Some(obj), Some(desc)) = (schema.as_object_mut(), param.get("description")) {
                obj.entry("description").or_insert_with(|| desc.clone());
            }
            properties.insert(name.to_string(), schema);

            let is_required = location == "path"
                || param.get("required").and_then(Value::as_bool).unwrap_or(false);
            if is_required {
                required.push(name.to_string());
            }
            if location == "header" {
                header_fields.push(name.to_string());
            }
        }

        if let Some(request_body) = operation.get("requestBody") {
            let schema = request_body
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| {
                    content
                        .get("application/json")
                        .or_else(|| content.values().next())
                })
                .and_then(|media| media.get("schema"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            let mut schema = schema;
            if let (Some(obj), Some(desc)) = (schema.as_object_mut(), request_body.get("description")) {
                obj.entry("description").or_insert_with(|| desc.clone());
            }
            properties.insert(HTTP_BODY_FIELD_DEFAULT.to_string(), schema);
            if request_body.get("required").and_then(Value::as_bool).unwrap_or(false) {
                required.push(HTTP_BODY_FIELD_DEFAULT.to_string());
            }
            has_body = true;
        }

        let mut inputs = json!({"type": "object", "properties": properties});
        if !required.is_empty() {
            inputs["required"] = json!(required);
        }
        (inputs, header_fields, has_body)
    }

    fn request_content_type(&self, operation: &Value) -> Option<String> {
        let content = operation.get("requestBody")?.get("content")?.as_object()?;
        if content.contains_key("application/json") {
            return None;
        }
        content.keys().next().cloned()
    }

    fn outputs(&self, operation: &Value) -> Value {
        let Some(responses) = operation.get("responses") else {
            return json!({"type": "object", "properties": {}});
        };

        for status in ["200", "201"] {
            let Some(response) = responses.get(status) else {
                continue;
            };
            let schema = response
                .pointer("/content/application~1json/schema")
                .or_else(|| response.get("schema"));
            if let Some(schema) = schema {
                return schema.clone();
            }
        }
        json!({"type": "object", "properties": {}})
    }

    // =========================================================================
    // Security
    // =========================================================================

    fn auth(&self, operation: &Value) -> Option<Auth> {
        let requirements = operation
            .get("security")
            .or_else(|| self.spec.get("security"))?
            .as_array()?;

        let schemes = self
            .spec
            .pointer("/components/securitySchemes")
            .or_else(|| self.spec.get("securityDefinitions"))?;

        for requirement in requirements {
            let Some(requirement) = requirement.as_object() else {
                continue;
            };
            for scheme_name in requirement.keys() {
                let Some(scheme) = schemes.get(scheme_name) else {
                    continue;
                };
                if let Some(auth) = self.scheme_to_auth(scheme_name, &self.resolve(scheme)) {
                    return Some(auth);
                }
            }
        }
        None
    }

    fn scheme_to_auth(&self, scheme_name: &str, scheme: &Value) -> Option<Auth> {
        let prefix = NON_IDENTIFIER
            .replace_all(scheme_name, "_")
            .trim_matches('_')
            .to_uppercase();
        let placeholder = |suffix: &str| format!("${{{}_{}}}", prefix, suffix);

        match scheme.get("type").and_then(Value::as_str)? {
            "apiKey" => {
                let location = match scheme.get("in").and_then(Value::as_str) {
                    Some("query") => ApiKeyLocation::Query,
                    Some("cookie") => ApiKeyLocation::Cookie,
                    _ => ApiKeyLocation::Header,
                };
                let mut auth = ApiKeyAuth::new(placeholder("API_KEY")).with_location(location);
                if let Some(var_name) = scheme.get("name").and_then(Value::as_str) {
                    auth = auth.with_var_name(var_name);
                }
                Some(Auth::ApiKey(auth))
            }
            "basic" => Some(Self::basic(&placeholder)),
            "http" => match scheme
                .get("scheme")
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase)
                .as_deref()
            {
                Some("basic") => Some(Self::basic(&placeholder)),
                Some("bearer") => Some(Auth::ApiKey(
                    ApiKeyAuth::new(format!("Bearer {}", placeholder("API_KEY")))
                        .with_var_name("Authorization"),
                )),
                _ => None,
            },
            "oauth2" => {
                let token_url = scheme
                    .pointer("/flows/clientCredentials/tokenUrl")
                    .or_else(|| {
                        (scheme.get("flow").and_then(Value::as_str) == Some("application"))
                            .then(|| scheme.get("tokenUrl"))
                            .flatten()
                    })
                    .and_then(Value::as_str)?;
                let scopes = scheme
                    .pointer("/flows/clientCredentials/scopes")
                    .or_else(|| scheme.get("scopes"))
                    .and_then(Value::as_object)
                    .map(|s| s.keys().cloned().collect::<Vec<_>>().join(" "))
                    .filter(|s| !s.is_empty());
                Some(Auth::OAuth2(OAuth2Auth {
                    token_url: token_url.to_string(),
                    client_id: placeholder("CLIENT_ID"),
                    client_secret: placeholder("CLIENT_SECRET"),
                    scope: scopes,
                }))
            }
            other => {
                debug!(scheme = %scheme_name, scheme_type = %other, "Unsupported security scheme");
                None
            }
        }
    }

    fn basic(placeholder: &dyn Fn(&str) -> String) -> Auth {
        Auth::Basic(BasicAuth {
            username: placeholder("USERNAME"),
            password: placeholder("PASSWORD"),
        })
    }

    // =========================================================================
    // $ref resolution
    // =========================================================================

    /// Inline every local `$ref`; cycles are left as `$ref` objects
    fn resolve(&self, value: &Value) -> Value {
        self.resolve_inner(value, &mut HashSet::new())
    }

    fn resolve_inner(&self, value: &Value, visiting: &mut HashSet<String>) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                    let Some(pointer) = reference.strip_prefix('#') else {
                        return value.clone();
                    };
                    if visiting.contains(reference) {
                        return value.clone();
                    }
                    let Some(target) = self.spec.pointer(pointer) else {
                        warn!(reference = %reference, "Unresolvable $ref");
                        return value.clone();
                    };
                    visiting.insert(reference.to_string());
                    let resolved = self.resolve_inner(target, visiting);
                    visiting.remove(reference);
                    return resolved;
                }
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), self.resolve_inner(v, visiting)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_inner(item, visiting))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
