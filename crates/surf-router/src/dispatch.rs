//! Tool dispatch: the name-to-handler table, capability declarations, the
//! scripting fallback, soft-fail, and the auto-screenshot policy.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use surf_netlog::NetworkStore;
use surf_types::protocol::{ContentPart, ToolParams, ToolRequest, ToolResponse};

use crate::browser::BrowserHandle;
use crate::cdp::CdpClient;
use crate::error::RouterError;
use crate::handlers;
use crate::shotcache::ScreenshotCache;
use crate::tabs::{SessionMode, TabRegistry, TabSession};

/// What a handler needs from the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Needs the full debugger session; no fallback (trusted input).
    Debugger,
    /// Runs on the evaluate-only path.
    Scripting,
    /// Prefers the debugger, can retry via scripting.
    Either,
    /// Needs an extension API this host cannot reach.
    External,
}

/// Handler families; each maps to one module under [`handlers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Tabs,
    Nav,
    Input,
    Inspect,
    Shots,
    Wait,
    Misc,
    Net,
    Ai,
}

/// One entry of the closed tool vocabulary.
pub struct ToolSpec {
    pub name: &'static str,
    pub capability: Capability,
    pub group: Group,
}

macro_rules! tool {
    ($name:literal, $cap:ident, $group:ident) => {
        ToolSpec {
            name: $name,
            capability: Capability::$cap,
            group: Group::$group,
        }
    };
}

/// The dispatch table. AI-site tools are matched by prefix in [`lookup`].
pub static TOOLS: &[ToolSpec] = &[
    // Tab management
    tool!("tab.list", Either, Tabs),
    tool!("tab.new", Either, Tabs),
    tool!("tab.close", Either, Tabs),
    tool!("tab.select", Either, Tabs),
    // Navigation
    tool!("navigate", Either, Nav),
    tool!("back", Either, Nav),
    tool!("forward", Either, Nav),
    tool!("reload", Either, Nav),
    // Input
    tool!("click", Either, Input),
    tool!("type", Either, Input),
    tool!("key", Debugger, Input),
    tool!("hover", Debugger, Input),
    tool!("scroll", Either, Input),
    tool!("drag", Debugger, Input),
    // Page inspection
    tool!("page.read", Either, Inspect),
    tool!("page.text", Either, Inspect),
    tool!("page.state", Either, Inspect),
    tool!("page.search", Either, Inspect),
    // Screenshots
    tool!("screenshot", Debugger, Shots),
    tool!("screenshot.full", Debugger, Shots),
    tool!("screenshot.get", Either, Shots),
    // Waiting
    tool!("wait.load", Either, Wait),
    tool!("wait.dom", Either, Wait),
    tool!("wait.element", Either, Wait),
    tool!("wait.url", Either, Wait),
    tool!("wait.idle", Debugger, Wait),
    // JavaScript, storage, emulation
    tool!("js.eval", Either, Misc),
    tool!("cookies.get", Debugger, Misc),
    tool!("cookies.set", Debugger, Misc),
    tool!("cookies.clear", Debugger, Misc),
    tool!("emulate.network", Debugger, Misc),
    tool!("emulate.cpu", Debugger, Misc),
    tool!("emulate.geo", Debugger, Misc),
    tool!("bookmarks.list", External, Misc),
    tool!("history.search", External, Misc),
    // Network capture
    tool!("net.start", Debugger, Net),
    tool!("net.stop", Debugger, Net),
    tool!("net.query", Either, Net),
    tool!("net.body", Either, Net),
    tool!("net.stats", Either, Net),
    tool!("net.clear", Either, Net),
];

/// Synthetic spec covering the `ai.*` prefix.
static AI_SPEC: ToolSpec = tool!("ai.*", Debugger, Ai);

/// Find the table entry for a tool name.
pub fn lookup(tool: &str) -> Option<&'static ToolSpec> {
    if let Some(spec) = TOOLS.iter().find(|s| s.name == tool) {
        return Some(spec);
    }
    if tool.starts_with("ai.") && tool.len() > 3 {
        return Some(&AI_SPEC);
    }
    None
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// DevTools port of the driven browser.
    pub cdp_port: u16,
    /// Base directory of the network-capture store.
    pub network_dir: PathBuf,
    /// Tools followed by an automatic post-action screenshot.
    pub auto_screenshot: HashSet<String>,
    /// Inline images in replies, or return cache handles.
    pub inline_screenshots: bool,
    pub shot_cache_bytes: usize,
    pub shot_retention: std::time::Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cdp_port: 9222,
            network_dir: surf_types::config::default_network_dir(),
            auto_screenshot: ["navigate", "click", "type", "key", "scroll"]
                .into_iter()
                .map(String::from)
                .collect(),
            inline_screenshots: true,
            shot_cache_bytes: crate::shotcache::DEFAULT_MAX_BYTES,
            shot_retention: crate::shotcache::DEFAULT_RETENTION,
        }
    }
}

impl RouterConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(port) = std::env::var("SURF_CDP_PORT") {
            if let Ok(port) = port.parse() {
                cfg.cdp_port = port;
            }
        }
        if let Ok(dir) = std::env::var(surf_types::config::ENV_NETWORK_PATH) {
            if !dir.is_empty() {
                cfg.network_dir = PathBuf::from(dir);
            }
        }
        cfg
    }
}

/// Pluggable AI-site flows. The per-site automation heuristics live outside
/// this crate; the default implementation reports the capability missing.
#[async_trait]
pub trait AiFlows: Send + Sync {
    async fn run(&self, cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError>;
}

/// The stand-in used when no AI flows are installed.
pub struct NoAiFlows;

#[async_trait]
impl AiFlows for NoAiFlows {
    async fn run(&self, cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
        Err(RouterError::Unsupported {
            detail: format!("AI site flow '{}' is not installed", cx.params.tool),
        })
    }
}

/// The content a handler produced.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub parts: Vec<ContentPart>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Serialize a value as a single JSON text part.
    pub fn json(value: &impl serde::Serialize) -> Result<Self, RouterError> {
        let text = serde_json::to_string(value).map_err(|e| RouterError::Protocol {
            detail: format!("unserialisable tool output: {e}"),
        })?;
        Ok(Self::text(text))
    }

    pub fn push(&mut self, part: ContentPart) {
        self.parts.push(part);
    }
}

/// Everything a handler gets to see for one request.
pub struct ToolCx<'a> {
    pub router: &'a Router,
    pub params: &'a ToolParams,
    pub mode: SessionMode,
}

impl ToolCx<'_> {
    /// The tab this request addresses.
    pub fn tab(&self) -> Result<Arc<TabSession>, RouterError> {
        self.router.tabs.resolve(self.params.tab_id)
    }

    /// The addressed tab's connection in the current mode.
    pub async fn session(&self) -> Result<(Arc<TabSession>, Arc<CdpClient>), RouterError> {
        let tab = self.tab()?;
        let client = tab.session(&self.router.browser, self.mode).await?;
        Ok((tab, client))
    }

    /// Evaluate JavaScript in the addressed tab.
    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, RouterError> {
        let tab = self.tab()?;
        tab.evaluate(&self.router.browser, self.mode, expression).await
    }

    /// A required string argument.
    pub fn arg_str(&self, key: &str) -> Result<&str, RouterError> {
        self.params
            .args
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RouterError::BadArgs {
                detail: format!("missing string argument '{key}'"),
            })
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.params.args.get(key).and_then(|v| v.as_str())
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        self.params.args.get(key).and_then(|v| v.as_i64())
    }

    pub fn opt_f64(&self, key: &str) -> Option<f64> {
        self.params.args.get(key).and_then(|v| v.as_f64())
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.params.args.get(key).and_then(|v| v.as_bool())
    }
}

/// The command router: dispatch table, session pool, caches, capture.
pub struct Router {
    pub(crate) browser: BrowserHandle,
    pub(crate) tabs: TabRegistry,
    pub(crate) shots: ScreenshotCache,
    pub(crate) store: NetworkStore,
    pub(crate) config: RouterConfig,
    ai: Box<dyn AiFlows>,
}

impl Router {
    /// Connect to the browser and open the capture store.
    pub async fn new(config: RouterConfig) -> Result<Self, RouterError> {
        let browser = BrowserHandle::connect(config.cdp_port).await?;
        let store = NetworkStore::open(&config.network_dir)?;
        store.spawn_boot_check();
        Ok(Self {
            browser,
            tabs: TabRegistry::new(),
            shots: ScreenshotCache::new(config.shot_cache_bytes, config.shot_retention),
            store,
            config,
            ai: Box::new(NoAiFlows),
        })
    }

    /// Install AI-site flows.
    pub fn with_ai_flows(mut self, ai: Box<dyn AiFlows>) -> Self {
        self.ai = ai;
        self
    }

    /// Run one request through its full lifecycle and produce its one reply.
    pub async fn handle(&self, req: &ToolRequest) -> ToolResponse {
        let params = &req.params;
        tracing::debug!(tool = %params.tool, id = %req.id, "request dispatched");

        match self.dispatch(params).await {
            Ok(mut out) => {
                if self.wants_auto_screenshot(params) {
                    if let Some(part) = self.auto_screenshot(params).await {
                        out.push(part);
                    }
                }
                ToolResponse::success(req.id.clone(), out.parts)
            }
            Err(e) if e.kind() == surf_types::ErrorKind::Capability && params.soft_fail => {
                // Exit-equivalent success with a warning body.
                tracing::debug!(tool = %params.tool, error = %e, "soft-fail downgrade");
                ToolResponse::text(req.id.clone(), format!("warning: {e}"))
            }
            Err(e) => {
                tracing::debug!(tool = %params.tool, error = %e, "request failed");
                ToolResponse::failure(req.id.clone(), &e.to_bridge())
            }
        }
    }

    /// Resolve the tool and run it, applying the fallback policy.
    pub(crate) async fn dispatch(&self, params: &ToolParams) -> Result<ToolOutput, RouterError> {
        let spec = lookup(&params.tool).ok_or_else(|| RouterError::UnknownTool {
            name: params.tool.clone(),
        })?;

        let primary = match spec.capability {
            Capability::Scripting => SessionMode::Scripting,
            _ => SessionMode::Debugger,
        };

        match self.run_in_mode(spec, params, primary).await {
            Err(e)
                if spec.capability == Capability::Either
                    && primary == SessionMode::Debugger
                    && e.allows_fallback() =>
            {
                tracing::debug!(tool = %params.tool, error = %e, "retrying via scripting");
                self.run_in_mode(spec, params, SessionMode::Scripting).await
            }
            other => other,
        }
    }

    async fn run_in_mode(
        &self,
        spec: &ToolSpec,
        params: &ToolParams,
        mode: SessionMode,
    ) -> Result<ToolOutput, RouterError> {
        if spec.capability == Capability::External {
            return Err(RouterError::Unsupported {
                detail: format!("'{}' needs an extension API this host cannot reach", spec.name),
            });
        }
        let cx = ToolCx {
            router: self,
            params,
            mode,
        };
        match spec.group {
            Group::Tabs => handlers::tabs::run(&cx).await,
            Group::Nav => handlers::nav::run(&cx).await,
            Group::Input => handlers::input::run(&cx).await,
            Group::Inspect => handlers::inspect::run(&cx).await,
            Group::Shots => handlers::shots::run(&cx).await,
            Group::Wait => handlers::wait::run(&cx).await,
            Group::Misc => handlers::misc::run(&cx).await,
            Group::Net => handlers::net::run(&cx).await,
            Group::Ai => self.ai.run(&cx).await,
        }
    }

    fn wants_auto_screenshot(&self, params: &ToolParams) -> bool {
        !params.no_screenshot && self.config.auto_screenshot.contains(&params.tool)
    }

    /// Best-effort post-action screenshot; failures never fail the request.
    async fn auto_screenshot(&self, params: &ToolParams) -> Option<ContentPart> {
        let tab = self.tabs.resolve(params.tab_id).ok()?;
        let client = tab.session(&self.browser, SessionMode::Debugger).await.ok()?;
        let bytes = handlers::shots::capture_viewport(&client).await.ok()?;
        Some(self.screenshot_part(bytes))
    }

    /// Wrap raw PNG bytes per the inline/handle configuration.
    pub(crate) fn screenshot_part(&self, bytes: Vec<u8>) -> ContentPart {
        if self.config.inline_screenshots {
            use base64::Engine as _;
            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
            ContentPart::image(data, "image/png")
        } else {
            let id = self.shots.insert(bytes, "image/png");
            ContentPart::text(format!("screenshot:{id}"))
        }
    }
}

/// Anything that can turn a request into a reply (the service loop's seam;
/// tests drive it with a stub instead of a live browser).
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, req: ToolRequest) -> ToolResponse;
}

#[async_trait]
impl RequestHandler for Router {
    async fn handle(&self, req: ToolRequest) -> ToolResponse {
        Router::handle(self, &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicate_names() {
        let mut seen = HashSet::new();
        for spec in TOOLS {
            assert!(seen.insert(spec.name), "duplicate tool {}", spec.name);
        }
    }

    #[test]
    fn lookup_resolves_exact_and_ai_prefix() {
        assert_eq!(lookup("navigate").unwrap().capability, Capability::Either);
        assert_eq!(lookup("key").unwrap().capability, Capability::Debugger);
        assert!(lookup("nope").is_none());

        let ai = lookup("ai.chatgpt.ask").unwrap();
        assert_eq!(ai.group, Group::Ai);
        assert!(lookup("ai.").is_none());
        // "aim" must not match the prefix rule.
        assert!(lookup("aim").is_none());
    }

    #[test]
    fn trusted_input_tools_never_fall_back() {
        for name in ["key", "hover", "drag"] {
            assert_eq!(lookup(name).unwrap().capability, Capability::Debugger);
        }
    }

    #[test]
    fn default_auto_screenshot_set() {
        let config = RouterConfig::default();
        for tool in ["navigate", "click", "type", "key", "scroll"] {
            assert!(config.auto_screenshot.contains(tool));
        }
        assert!(!config.auto_screenshot.contains("page.read"));
    }
}
