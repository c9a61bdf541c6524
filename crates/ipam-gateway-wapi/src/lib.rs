// # Infoblox WAPI Record Gateway
//
// This crate provides the `RecordGateway` implementation that speaks the
// Infoblox WAPI REST dialect.
//
// ## Implementation Status
//
// - ✅ One HTTP request per gateway call (allocation takes two: network lookup, then allocation)
// - ✅ Full error propagation to the reconciler
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Status mapping (401/403, 404, 429, 5xx)
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry logic (owned by the orchestrator)
// - ❌ NO attribute merging (owned by Reconciler)
// - ❌ NO caching (state owned by StateStore)
// - ❌ NO background tasks
//
// ### Trust Level: Untrusted (Record Gateway)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS API calls to the configured grid master only
// - ✅ Parse WAPI responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic
// - ❌ Access state store
// - ❌ Decide whether a write is needed
//
// ## Security Requirements
//
// - The password NEVER appears in logs or `Debug` output
// - Credentials MUST be provided via configuration or environment only
//
// ## API Reference
//
// - Base URL: `<url>/wapi/v<version>/`
// - Read record: GET `/<ref>?_return_fields=...`
// - Search records: GET `/record:aaaa?view=...&*<ea>=...`
// - Create record: POST `/record:aaaa`
// - Update record: PUT `/<ref>`
// - Delete record: DELETE `/<ref>`
// - Find network: GET `/ipv6network?network=...&network_view=...`
// - Allocate: POST `/<network-ref>?_function=next_available_ip`

use async_trait::async_trait;
use ipam_core::attrs::ExtAttrs;
use ipam_core::config::GatewayConfig;
use ipam_core::resolve::FilterParams;
use ipam_core::traits::{
    RecordGateway, RecordGatewayFactory, RecordKind, RecordPayload, RemoteRecord, TtlSetting,
};
use ipam_core::{Error, GatewayRegistry, Result};
use ipnet::Ipv6Net;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fields requested on every record read
const RETURN_FIELDS: &str = "name,ipv6addr,view,ttl,use_ttl,comment,extattrs";

/// Allocation function on `ipv6network` objects
const NEXT_AVAILABLE_FUNCTION: &str = "next_available_ip";

/// Environment switch for dry-run mode
pub const MODE_ENV: &str = "IPAM_MODE";

const GATEWAY_NAME: &str = "wapi";

/// WAPI-backed record gateway
///
/// # Dry-Run Mode
///
/// When `dry_run` is true the gateway still performs every read (record
/// lookups, searches, network lookup and address allocation, which does not
/// reserve the address) but only logs creates, updates and deletes. Writes
/// are answered from the payload so the reconciler can proceed.
pub struct WapiGateway {
    base_url: String,
    username: String,
    /// ⚠️ NEVER log this value
    password: String,
    client: reqwest::Client,
    dry_run: bool,
}

impl std::fmt::Debug for WapiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WapiGateway")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Record object as returned by WAPI
#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(rename = "_ref")]
    reference: String,
    name: String,
    ipv6addr: String,
    #[serde(default)]
    view: Option<String>,
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    use_ttl: Option<bool>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    extattrs: BTreeMap<String, WireAttr>,
}

#[derive(Debug, Deserialize)]
struct WireAttr {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireNetwork {
    #[serde(rename = "_ref")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct WireAllocation {
    #[serde(default)]
    ips: Vec<String>,
}

impl WireRecord {
    fn into_remote(self) -> Result<RemoteRecord> {
        let ipv6_addr = self.ipv6addr.parse::<Ipv6Addr>().map_err(|e| {
            Error::gateway(
                GATEWAY_NAME,
                format!("invalid ipv6addr '{}' in {}: {}", self.ipv6addr, self.reference, e),
            )
        })?;

        let ttl = if self.use_ttl.unwrap_or(false) {
            TtlSetting::Explicit(self.ttl.unwrap_or(0))
        } else {
            TtlSetting::Inherit
        };

        let ext_attrs = self
            .extattrs
            .into_iter()
            .map(|(key, attr)| (key, attr_text(attr.value)))
            .collect();

        Ok(RemoteRecord {
            reference: self.reference,
            fqdn: self.name,
            ipv6_addr,
            dns_view: self.view.unwrap_or_else(|| "default".to_string()),
            ttl,
            comment: self.comment.filter(|c| !c.is_empty()),
            ext_attrs,
        })
    }
}

/// Text form of an attribute value (WAPI also returns integers and lists)
fn attr_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Attributes in the WAPI wire shape: `{"Site": {"value": "HQ"}}`
fn wire_attrs(attrs: &ExtAttrs) -> Value {
    let map: Map<String, Value> = attrs
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "value": value })))
        .collect();
    Value::Object(map)
}

/// Request body for a create (`with_view`) or update
fn wire_body(payload: &RecordPayload, with_view: bool) -> Value {
    let mut body = json!({
        "name": payload.fqdn,
        "ipv6addr": payload.ipv6_addr.to_string(),
        "use_ttl": payload.ttl.use_ttl(),
        "comment": payload.comment.clone().unwrap_or_default(),
        "extattrs": wire_attrs(&payload.ext_attrs),
    });
    if let Some(ttl) = payload.ttl.ttl() {
        body["ttl"] = json!(ttl);
    }
    if with_view {
        if let Some(view) = &payload.dns_view {
            body["view"] = json!(view);
        }
    }
    body
}

/// Map a non-success status to the reconciler's error taxonomy
fn status_error(status: reqwest::StatusCode, body: &str, context: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "{}: invalid credentials or insufficient permissions (status {})",
            context, status
        )),
        404 => Error::not_found(context.to_string()),
        429 => Error::transient(format!("{}: rate limit exceeded (status {})", context, status)),
        500..=599 => Error::transient(format!("{}: server error {} - {}", context, status, body)),
        _ => Error::gateway(GATEWAY_NAME, format!("{}: {} - {}", context, status, body)),
    }
}

/// Whether a failed allocation reports a full network
///
/// WAPI answers with a data-conflict error naming the missing addresses; any
/// other 400 (protocol errors included) is left as a gateway error.
fn is_exhaustion(message: &str) -> bool {
    message.contains("IBDataConflictError")
        || (message.contains("Cannot find") && message.contains("available IP"))
}

fn transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() || error.is_connect() {
        Error::transient(format!("HTTP request failed: {}", error))
    } else {
        Error::gateway(GATEWAY_NAME, format!("HTTP request failed: {}", error))
    }
}

impl WapiGateway {
    /// Create a new WAPI gateway
    ///
    /// # Parameters
    ///
    /// - `url`: grid master base URL, e.g. `https://gm.example.com`
    /// - `wapi_version`: API version, e.g. `2.12`
    /// - `dry_run`: if true, perform reads but only log writes
    ///
    /// # Errors
    ///
    /// `Error::Config` for empty credentials or if the HTTP client cannot be
    /// built.
    pub fn new(
        url: &str,
        wapi_version: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return Err(Error::config("WAPI username and password are required"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("{}/wapi/v{}/", url.trim_end_matches('/'), wapi_version),
            username,
            password,
            client,
            dry_run,
        })
    }

    /// Base URL every object path is appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether writes are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn object_type(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::Aaaa => "record:aaaa",
        }
    }

    /// Send a request and decode a successful JSON body
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, &body, context));
        }

        response.json::<T>().await.map_err(|e| {
            Error::gateway(GATEWAY_NAME, format!("{}: failed to parse response: {}", context, e))
        })
    }

    async fn search(&self, kind: RecordKind, query: &[(String, String)]) -> Result<Vec<RemoteRecord>> {
        let context = format!("search {}", Self::object_type(kind));
        let request = self
            .client
            .get(self.url(Self::object_type(kind)))
            .query(query)
            .query(&[("_return_fields", RETURN_FIELDS)]);

        let records: Vec<WireRecord> = self.send(request, &context).await?;
        records.into_iter().map(WireRecord::into_remote).collect()
    }

    /// Stand-in for a write that dry-run mode skipped
    fn simulated(&self, payload: &RecordPayload, reference: Option<&str>) -> RemoteRecord {
        let dns_view = payload
            .dns_view
            .clone()
            .unwrap_or_else(|| "default".to_string());
        RemoteRecord {
            reference: reference.map(str::to_string).unwrap_or_else(|| {
                format!("record:aaaa/dry-run:{}/{}", payload.fqdn, dns_view)
            }),
            fqdn: payload.fqdn.clone(),
            ipv6_addr: payload.ipv6_addr,
            dns_view,
            ttl: payload.ttl,
            comment: payload.comment.clone(),
            ext_attrs: payload.ext_attrs.clone(),
        }
    }
}

#[async_trait]
impl RecordGateway for WapiGateway {
    async fn search_by_alt_id(
        &self,
        kind: RecordKind,
        reference: &str,
        internal_id: &str,
        attr_name: &str,
    ) -> Result<RemoteRecord> {
        if !reference.is_empty() {
            match self.get_by_ref(reference).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Reference {} not found, searching by {}", reference, attr_name);
                }
                Err(e) => return Err(e),
            }
        }

        if internal_id.is_empty() {
            return Err(Error::not_found(format!("record {} not found", reference)));
        }

        let query = [(
            format!("{}{}", FilterParams::EXT_ATTR_MARKER, attr_name),
            internal_id.to_string(),
        )];
        let mut matches = self.search(kind, &query).await?;
        match matches.len() {
            0 => Err(Error::not_found(format!(
                "no {} record with {} = {}",
                kind.as_str(),
                attr_name,
                internal_id
            ))),
            1 => Ok(matches.remove(0)),
            count => Err(Error::ambiguous(
                count,
                format!("{{\"{}{}\":\"{}\"}}", FilterParams::EXT_ATTR_MARKER, attr_name, internal_id),
            )),
        }
    }

    async fn get_by_ref(&self, reference: &str) -> Result<RemoteRecord> {
        let context = format!("record {}", reference);
        let request = self
            .client
            .get(self.url(reference))
            .query(&[("_return_fields", RETURN_FIELDS)]);

        let record: WireRecord = self.send(request, &context).await?;
        record.into_remote()
    }

    async fn search_by_filter(
        &self,
        kind: RecordKind,
        filter: &FilterParams,
        dns_view: &str,
    ) -> Result<Vec<RemoteRecord>> {
        let mut query = vec![("view".to_string(), dns_view.to_string())];
        query.extend(
            filter
                .query_pairs()
                .into_iter()
                .filter(|(key, _)| key != "view"),
        );

        tracing::debug!("Searching {} records matching {}", kind.as_str(), filter);
        self.search(kind, &query).await
    }

    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord> {
        let body = wire_body(payload, true);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would POST {} with payload: {}", self.url("record:aaaa"), body);
            return Ok(self.simulated(payload, None));
        }

        tracing::info!("Creating AAAA record {} -> {}", payload.fqdn, payload.ipv6_addr);
        let request = self
            .client
            .post(self.url("record:aaaa"))
            .query(&[("_return_fields", RETURN_FIELDS)])
            .json(&body);

        let record: WireRecord = self
            .send(request, &format!("create record {}", payload.fqdn))
            .await?;
        record.into_remote()
    }

    async fn update(&self, payload: &RecordPayload, reference: &str) -> Result<RemoteRecord> {
        let body = wire_body(payload, false);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would PUT {} with payload: {}", self.url(reference), body);
            return Ok(self.simulated(payload, Some(reference)));
        }

        tracing::info!("Updating AAAA record {} -> {}", payload.fqdn, payload.ipv6_addr);
        let request = self
            .client
            .put(self.url(reference))
            .query(&[("_return_fields", RETURN_FIELDS)])
            .json(&body);

        let record: WireRecord = self
            .send(request, &format!("update record {}", reference))
            .await?;
        record.into_remote()
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!("[DRY-RUN] Would DELETE {}", self.url(reference));
            return Ok(());
        }

        tracing::info!("Deleting record {}", reference);
        let request = self.client.delete(self.url(reference));
        match self
            .send::<Value>(request, &format!("delete record {}", reference))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!("Record {} already absent", reference);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn allocate_next_address(&self, network_view: &str, cidr: &Ipv6Net) -> Result<Ipv6Addr> {
        let network = cidr.to_string();
        let request = self
            .client
            .get(self.url("ipv6network"))
            .query(&[("network", network.as_str()), ("network_view", network_view)]);
        let networks: Vec<WireNetwork> = self
            .send(request, &format!("network {} in view {}", network, network_view))
            .await?;

        let network_ref = networks.into_iter().next().ok_or_else(|| {
            Error::not_found(format!("network {} in view {}", network, network_view))
        })?;

        let request = self
            .client
            .post(self.url(&network_ref.reference))
            .query(&[("_function", NEXT_AVAILABLE_FUNCTION)])
            .json(&json!({ "num": 1 }));

        // WAPI reports a full network as a 400 with an explanatory body
        let allocation: WireAllocation = match self
            .send(request, &format!("allocate in {}", network))
            .await
        {
            Ok(allocation) => allocation,
            Err(Error::Gateway { message, .. }) if is_exhaustion(&message) => {
                return Err(Error::exhausted(network_view, network));
            }
            Err(e) => return Err(e),
        };

        let address = allocation
            .ips
            .into_iter()
            .next()
            .ok_or_else(|| Error::exhausted(network_view, network.clone()))?;

        address.parse::<Ipv6Addr>().map_err(|e| {
            Error::gateway(GATEWAY_NAME, format!("invalid allocated address '{}': {}", address, e))
        })
    }

    fn gateway_name(&self) -> &'static str {
        GATEWAY_NAME
    }
}

/// Factory for creating WAPI gateways
pub struct WapiFactory;

impl RecordGatewayFactory for WapiFactory {
    fn create(&self, config: &GatewayConfig) -> Result<Box<dyn RecordGateway>> {
        match config {
            GatewayConfig::Wapi {
                url,
                username,
                password,
                wapi_version,
                dry_run,
            } => {
                config.validate()?;

                let dry_run = *dry_run
                    || std::env::var(MODE_ENV).unwrap_or_default().to_lowercase() == "dry-run";
                if dry_run {
                    tracing::warn!("WAPI gateway running in DRY-RUN mode - no changes will be made");
                }

                Ok(Box::new(WapiGateway::new(
                    url,
                    wapi_version,
                    username.clone(),
                    password.clone(),
                    dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for WAPI gateway")),
        }
    }
}

/// Register the WAPI gateway with a registry
///
/// # Example
///
/// ```rust
/// use ipam_core::GatewayRegistry;
///
/// let registry = GatewayRegistry::new();
/// ipam_gateway_wapi::register(&registry);
/// assert!(registry.has_gateway("wapi"));
/// ```
pub fn register(registry: &GatewayRegistry) {
    registry.register_gateway(GATEWAY_NAME, Box::new(WapiFactory));
}
