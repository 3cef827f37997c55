//! Request dispatcher
//!
//! Validates incoming envelopes, resolves the consent tier, routes to the
//! tool registry or a resource provider, and assembles response envelopes.
//! Each request moves Idle → Validating → Authorizing → Executing →
//! Responding; every failure path ends in a structured error response for
//! the one caller, never in a dead server.

use crate::config::ServerSettings;
use crate::consent::{required_tier, ConsentGate};
use crate::error::{Result, ServerError};
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::resources::ResourceProvider;
use crate::tools::ToolRegistry;
use crate::types::{CallerContext, CapabilitySet, ConsentTier, ResourceUri};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// MCP protocol revision this server speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server core: routes envelopes to tools and resources under the gate.
pub struct Dispatcher {
    server_name: String,
    capabilities: CapabilitySet,
    gate: ConsentGate,
    tools: Arc<dyn ToolRegistry>,
    providers: HashMap<String, Arc<ResourceProvider>>,
}

impl Dispatcher {
    /// Assemble the server core from explicitly constructed collaborators.
    pub fn new(
        settings: &ServerSettings,
        tools: Arc<dyn ToolRegistry>,
        providers: Vec<Arc<ResourceProvider>>,
    ) -> Result<Self> {
        let capabilities = settings.capability_set()?;
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Ok(Self {
            server_name: settings.server.name.clone(),
            capabilities,
            gate: ConsentGate::new(&settings.consent),
            tools,
            providers,
        })
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Dispatch a request value: a single envelope or a batch array.
    ///
    /// Returns `None` when nothing is owed to the caller (notifications, or
    /// a batch consisting solely of notifications).
    pub async fn dispatch(&self, request: Value, ctx: Option<&CallerContext>) -> Option<Value> {
        match request {
            Value::Array(elements) => self.dispatch_batch(elements, ctx).await,
            single => self
                .dispatch_single(single, ctx)
                .await
                .map(envelope_value),
        }
    }

    /// Process batch elements independently and concurrently.
    ///
    /// A malformed element produces its own error response without touching
    /// its siblings; responses come back in best-effort input order.
    async fn dispatch_batch(
        &self,
        elements: Vec<Value>,
        ctx: Option<&CallerContext>,
    ) -> Option<Value> {
        if !self.capabilities.enabled("batch") {
            return Some(envelope_value(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request("batch requests are not enabled"),
            )));
        }
        if elements.is_empty() {
            return Some(envelope_value(JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request("batch must be a non-empty array"),
            )));
        }
        let responses: Vec<Value> = join_all(
            elements
                .into_iter()
                .map(|element| self.dispatch_single(element, ctx)),
        )
        .await
        .into_iter()
        .flatten()
        .map(envelope_value)
        .collect();

        if responses.is_empty() {
            // batch of notifications only
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    /// Run one envelope through validation, the gate and the method body.
    pub async fn dispatch_single(
        &self,
        request: Value,
        ctx: Option<&CallerContext>,
    ) -> Option<JsonRpcResponse> {
        // Validating: the id is echoed even when the shape is bad
        let id_hint = request.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => {
                debug!("malformed envelope: {}", e);
                return Some(JsonRpcResponse::error(
                    id_hint,
                    JsonRpcError::invalid_request(format!("malformed request envelope: {}", e)),
                ));
            }
        };
        if let Err(e) = request.validate() {
            return Some(JsonRpcResponse::error(
                request.id.clone(),
                JsonRpcError::from(&e),
            ));
        }

        let notification = request.is_notification();
        let id = request.id.clone();

        // Authorizing
        if let Some(ctx) = ctx {
            let required = self.effective_tier(&request);
            if let Err(e) = self.gate.verify(ctx, &request.method, required) {
                info!(
                    "denied {} for {}: {}",
                    request.method, ctx.client_id, e
                );
                return if notification {
                    None
                } else {
                    Some(JsonRpcResponse::error(id, JsonRpcError::from(&e)))
                };
            }
        }

        // Executing → Responding
        match self.route(&request).await {
            Ok(result) => {
                if notification {
                    None
                } else {
                    Some(JsonRpcResponse::success(id, result))
                }
            }
            Err(e) => {
                debug!("{} failed: {}", request.method, e);
                if notification {
                    None
                } else {
                    Some(JsonRpcResponse::error(id, JsonRpcError::from(&e)))
                }
            }
        }
    }

    /// Tier required for this specific request.
    ///
    /// Starts from the method's nominal tier and escalates to elevated for
    /// dangerous tools and sensitive resources.
    fn effective_tier(&self, request: &JsonRpcRequest) -> ConsentTier {
        let base = required_tier(&request.method);

        if request.method == "tools/call" {
            if let Some(name) = request.params.get("name").and_then(Value::as_str) {
                if self.tools.get(name).map(|d| d.dangerous).unwrap_or(false) {
                    return base.max(ConsentTier::Elevated);
                }
            }
        }

        if request.method.starts_with("resources/") {
            if let Some(raw) = request.params.get("uri").and_then(Value::as_str) {
                if let Ok(uri) = ResourceUri::parse(raw) {
                    if let Some(provider) = self.providers.get(&uri.provider) {
                        if provider.is_sensitive(&uri.path) {
                            return base.max(ConsentTier::Elevated);
                        }
                    }
                }
            }
        }

        base
    }

    /// Route a validated request to its method body.
    async fn route(&self, request: &JsonRpcRequest) -> Result<Value> {
        let params = &request.params;
        match request.method.as_str() {
            "initialize" => self.handle_initialize(params),
            "ping" => Ok(json!({})),
            "capabilities/list" => Ok(json!({ "capabilities": self.capabilities.as_map() })),
            "capabilities/negotiate" => {
                let client = params.get("capabilities").cloned().unwrap_or(Value::Null);
                let negotiated = self.capabilities.negotiate(&client);
                Ok(json!({ "capabilities": negotiated.as_map() }))
            }
            "tools/list" => Ok(json!({ "tools": self.tools.list() })),
            "tools/get" => {
                let name = required_str(params, "name")?;
                let descriptor = self.tools.get(name).ok_or_else(|| {
                    ServerError::InvalidParams(format!("unknown tool: {}", name))
                })?;
                Ok(serde_json::to_value(descriptor)?)
            }
            "tools/call" => {
                let name = required_str(params, "name")?;
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Object(serde_json::Map::new()));
                self.tools.execute(name, arguments).await
            }
            "resources/list" => {
                let (provider, uri) = self.resolve_provider(params)?;
                let listed = provider.list(&uri).await?;
                Ok(json!({ "resources": listed }))
            }
            "resources/read" => {
                let (provider, uri) = self.resolve_provider(params)?;
                let bypass = params
                    .get("bypass_cache")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let content = provider.read(&uri, bypass).await?;
                Ok(serde_json::to_value(content)?)
            }
            "resources/read_range" => {
                let (provider, uri) = self.resolve_provider(params)?;
                let range = required_str(params, "range")?;
                let content = provider.read_range(&uri, range).await?;
                Ok(serde_json::to_value(content)?)
            }
            "resources/stream/open" => {
                if !self.capabilities.enabled("resource_streaming") {
                    return Err(ServerError::InvalidRequest(
                        "resource streaming is not enabled".to_string(),
                    ));
                }
                let (provider, uri) = self.resolve_provider(params)?;
                let range = params.get("range").and_then(Value::as_str);
                let compress = params.get("compress").and_then(Value::as_bool);
                let handle = provider.read_stream(&uri, range, compress).await?;
                Ok(serde_json::to_value(handle)?)
            }
            "resources/stream/next" => {
                let stream_id = required_stream_id(params)?;
                let provider = self.provider_of_stream(stream_id)?;
                let chunk = provider.next_chunk(stream_id).await?;
                Ok(serde_json::to_value(chunk)?)
            }
            "resources/stream/close" => {
                let stream_id = required_stream_id(params)?;
                let provider = self.provider_of_stream(stream_id)?;
                provider.close_stream(stream_id)?;
                Ok(json!({ "closed": stream_id }))
            }
            "resources/subscribe" => {
                if !self.capabilities.enabled("subscriptions") {
                    return Err(ServerError::InvalidRequest(
                        "subscriptions are not enabled".to_string(),
                    ));
                }
                let (provider, uri) = self.resolve_provider(params)?;
                let callback_id = required_str(params, "callback_id")?;
                provider.subscribe(&uri, callback_id);
                Ok(json!({ "subscribed": uri.to_string() }))
            }
            "resources/unsubscribe" => {
                let (provider, uri) = self.resolve_provider(params)?;
                let callback_id = required_str(params, "callback_id")?;
                provider.unsubscribe(&uri, callback_id)?;
                Ok(json!({ "unsubscribed": uri.to_string() }))
            }
            "consent/violations" => {
                Ok(json!({ "violations": self.gate.violations() }))
            }
            other => Err(ServerError::MethodNotFound(other.to_string())),
        }
    }

    fn handle_initialize(&self, params: &Value) -> Result<Value> {
        let client = params.get("capabilities").cloned().unwrap_or(Value::Null);
        let negotiated = self.capabilities.negotiate(&client);
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": negotiated.as_map()
        }))
    }

    fn resolve_provider(&self, params: &Value) -> Result<(&Arc<ResourceProvider>, ResourceUri)> {
        let raw = required_str(params, "uri")?;
        let uri = ResourceUri::parse(raw)?;
        let provider = self.providers.get(&uri.provider).ok_or_else(|| {
            ServerError::InvalidParams(format!("unknown resource provider: {}", uri.provider))
        })?;
        Ok((provider, uri))
    }

    fn provider_of_stream(&self, stream_id: Uuid) -> Result<&Arc<ResourceProvider>> {
        self.providers
            .values()
            .find(|provider| provider.has_stream(stream_id))
            .ok_or_else(|| ServerError::UnknownStream(stream_id.to_string()))
    }

    /// Reap idle streams across every provider; returns the total dropped.
    pub fn reap_idle_streams(&self, max_idle: Duration) -> usize {
        self.providers
            .values()
            .map(|provider| provider.reap_idle_streams(max_idle))
            .sum()
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::InvalidParams(format!("missing '{}' parameter", key)))
}

fn required_stream_id(params: &Value) -> Result<Uuid> {
    let raw = required_str(params, "stream_id")?;
    Uuid::parse_str(raw)
        .map_err(|_| ServerError::InvalidParams(format!("'{}' is not a stream id", raw)))
}

/// Validate the outgoing envelope, downgrading to a minimal internal-error
/// envelope if it cannot be represented.
fn envelope_value(response: JsonRpcResponse) -> Value {
    let id = response.id.clone();
    serde_json::to_value(&response).unwrap_or_else(|e| {
        warn!("response failed to serialize, downgrading: {}", e);
        json!({
            "jsonrpc": "2.0",
            "error": { "code": -32603, "message": "internal error" },
            "id": id
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MemoryStore;
    use crate::tools::{StaticToolRegistry, Tool};
    use crate::types::{Role, ToolDescriptor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
        dangerous: bool,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: if self.dangerous { "wipe" } else { "echo" }.to_string(),
                description: "counting test tool".to_string(),
                dangerous: self.dangerous,
                input_schema: None,
            }
        }

        async fn run(&self, args: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args)
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        calls: Arc<AtomicUsize>,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = StaticToolRegistry::new();
        registry.register(Arc::new(CountingTool {
            calls: calls.clone(),
            dangerous: false,
        }));
        registry.register(Arc::new(CountingTool {
            calls: calls.clone(),
            dangerous: true,
        }));

        let store = Arc::new(MemoryStore::new());
        store.insert("a.txt", b"0123456789".to_vec());
        let mut settings = ServerSettings::default();
        settings.cache.max_size = 2;
        let provider = Arc::new(
            ResourceProvider::new("file", store.clone(), &settings, true).unwrap(),
        );

        Harness {
            dispatcher: Dispatcher::new(&settings, Arc::new(registry), vec![provider])
                .unwrap(),
            calls,
            store,
        }
    }

    fn basic_caller() -> CallerContext {
        CallerContext::new("client-1", "alice", Role::Admin, ConsentTier::Basic)
    }

    async fn roundtrip(dispatcher: &Dispatcher, request: Value) -> Value {
        dispatcher.dispatch(request, None).await.unwrap()
    }

    fn error_code(response: &Value) -> i64 {
        response["error"]["code"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_missing_method_is_invalid_request() {
        let h = harness();
        let response = roundtrip(&h.dispatcher, json!({"id": 1})).await;
        assert_eq!(error_code(&response), -32600);
        assert_eq!(response["id"], json!(1));
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let h = harness();
        let response =
            roundtrip(&h.dispatcher, json!({"method": "nope/nothing", "id": 2})).await;
        assert_eq!(error_code(&response), -32601);
    }

    #[tokio::test]
    async fn test_notification_produces_no_response() {
        let h = harness();
        assert!(h
            .dispatcher
            .dispatch(json!({"method": "ping"}), None)
            .await
            .is_none());
        assert!(h
            .dispatcher
            .dispatch(json!({"method": "ping", "id": null}), None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_isolates_malformed_elements() {
        let h = harness();
        let response = roundtrip(
            &h.dispatcher,
            json!([
                {"method": "ping", "id": 1},
                {"id": 2}
            ]),
        )
        .await;
        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        let codes: Vec<Option<i64>> = responses
            .iter()
            .map(|r| r["error"]["code"].as_i64())
            .collect();
        assert!(codes.contains(&None)); // the success
        assert!(codes.contains(&Some(-32600)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_invalid() {
        let h = harness();
        let response = roundtrip(&h.dispatcher, json!([])).await;
        assert_eq!(error_code(&response), -32600);
    }

    #[tokio::test]
    async fn test_batch_of_notifications_yields_nothing() {
        let h = harness();
        assert!(h
            .dispatcher
            .dispatch(json!([{"method": "ping"}, {"method": "ping"}]), None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tool_call_executes() {
        let h = harness();
        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "tools/call", "id": 3,
                   "params": {"name": "echo", "arguments": {"x": 1}}}),
        )
        .await;
        assert_eq!(response["result"], json!({"x": 1}));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dangerous_tool_requires_elevated() {
        let h = harness();
        let ctx = basic_caller();
        let response = h
            .dispatcher
            .dispatch(
                json!({"method": "tools/call", "id": 4,
                       "params": {"name": "wipe", "arguments": {}}}),
                Some(&ctx),
            )
            .await
            .unwrap();
        assert_eq!(error_code(&response), -32000);
        // the tool body never ran
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_viewer_role_gets_authorization_error() {
        let h = harness();
        let ctx = CallerContext::new("client-2", "bob", Role::Viewer, ConsentTier::Full);
        let response = h
            .dispatcher
            .dispatch(
                json!({"method": "tools/call", "id": 5,
                       "params": {"name": "echo", "arguments": {}}}),
                Some(&ctx),
            )
            .await
            .unwrap();
        assert_eq!(error_code(&response), -32002);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        // the denial was recorded and is visible to an elevated caller
        let admin = CallerContext::new("ops", "carol", Role::Admin, ConsentTier::Full);
        let response = h
            .dispatcher
            .dispatch(
                json!({"method": "consent/violations", "id": 6}),
                Some(&admin),
            )
            .await
            .unwrap();
        let violations = response["result"]["violations"].as_array().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["username"], "bob");
    }

    #[tokio::test]
    async fn test_sensitive_resource_escalates() {
        let h = harness();
        h.store.insert("server.pem", b"-----BEGIN KEY-----".to_vec());
        let ctx = basic_caller();
        let response = h
            .dispatcher
            .dispatch(
                json!({"method": "resources/read", "id": 7,
                       "params": {"uri": "resource://file/server.pem"}}),
                Some(&ctx),
            )
            .await
            .unwrap();
        assert_eq!(error_code(&response), -32000);

        // a plain file at the same tier goes through
        let response = h
            .dispatcher
            .dispatch(
                json!({"method": "resources/read", "id": 8,
                       "params": {"uri": "resource://file/a.txt"}}),
                Some(&ctx),
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["content"], "0123456789");
    }

    #[tokio::test]
    async fn test_read_is_cached_end_to_end() {
        let h = harness();
        for _ in 0..2 {
            let response = roundtrip(
                &h.dispatcher,
                json!({"method": "resources/read", "id": 9,
                       "params": {"uri": "resource://file/a.txt"}}),
            )
            .await;
            assert_eq!(response["result"]["content"], "0123456789");
        }
        // the second read was served from cache
        assert_eq!(h.store.read_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_and_negotiate() {
        let h = harness();
        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "initialize", "id": 10,
                   "params": {"capabilities": {"tools": true, "resources": true}}}),
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "janus");
        assert_eq!(result["capabilities"]["tools"], true);
        // client did not declare batch, so it negotiates off
        assert_eq!(result["capabilities"]["batch"], false);
    }

    #[tokio::test]
    async fn test_stream_lifecycle_over_rpc() {
        let h = harness();
        let opened = roundtrip(
            &h.dispatcher,
            json!({"method": "resources/stream/open", "id": 11,
                   "params": {"uri": "resource://file/a.txt", "compress": false}}),
        )
        .await;
        let stream_id = opened["result"]["stream_id"].as_str().unwrap().to_string();

        let mut content = String::new();
        loop {
            let chunk = roundtrip(
                &h.dispatcher,
                json!({"method": "resources/stream/next", "id": 12,
                       "params": {"stream_id": stream_id}}),
            )
            .await;
            content.push_str(chunk["result"]["content"].as_str().unwrap());
            if chunk["result"]["complete"].as_bool().unwrap() {
                break;
            }
        }
        assert_eq!(content, "0123456789");

        // the cursor is gone now
        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "resources/stream/next", "id": 13,
                   "params": {"stream_id": stream_id}}),
        )
        .await;
        assert_eq!(error_code(&response), -32602);
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe_over_rpc() {
        let h = harness();
        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "resources/subscribe", "id": 14,
                   "params": {"uri": "resource://file/a.txt", "callback_id": "cb-1"}}),
        )
        .await;
        assert!(response["result"]["subscribed"].is_string());

        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "resources/unsubscribe", "id": 15,
                   "params": {"uri": "resource://file/a.txt", "callback_id": "cb-9"}}),
        )
        .await;
        assert_eq!(error_code(&response), -32602);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_invalid_params() {
        let h = harness();
        let response = roundtrip(
            &h.dispatcher,
            json!({"method": "resources/read", "id": 16,
                   "params": {"uri": "resource://vault/x"}}),
        )
        .await;
        assert_eq!(error_code(&response), -32602);
    }
}
