//! The sequential step executor.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use surf_bridge::BridgeClient;
use surf_types::protocol::{ContentPart, ToolResponse};
use surf_types::BridgeError;

use crate::step::{LeafStep, LoopStep, Step, MAX_LOOP_ITERATIONS};
use crate::vars::{substitute, VarMap};

/// Commands that trigger navigation; the engine follows them with
/// `wait.load`.
const NAVIGATION_CMDS: &[&str] = &["go", "navigate", "back", "forward", "reload", "tab.new", "tab.select"];
/// Commands that mutate the DOM; the engine follows them with `wait.dom`.
const MUTATION_CMDS: &[&str] = &["click", "type", "key", "submit"];

/// What to do when a leaf step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the workflow on the first failure.
    #[default]
    Stop,
    /// Record the failure and keep going.
    Continue,
}

/// Engine knobs.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub on_error: ErrorPolicy,
    pub auto_wait: bool,
    /// Deadline handed to the implicit wait steps.
    pub auto_wait_timeout_ms: u64,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::Stop,
            auto_wait: true,
            auto_wait_timeout_ms: 5_000,
        }
    }
}

/// The seam the engine issues requests through; [`BridgeClient`] is the
/// production implementation, tests plug in mocks.
#[async_trait]
pub trait ToolExecutor: Send {
    async fn execute(&mut self, tool: &str, args: Value) -> Result<ToolResponse, BridgeError>;
}

#[async_trait]
impl ToolExecutor for BridgeClient {
    async fn execute(&mut self, tool: &str, args: Value) -> Result<ToolResponse, BridgeError> {
        BridgeClient::execute(self, tool, args).await
    }
}

/// One executed leaf, for the report.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub cmd: String,
    pub ok: bool,
    pub detail: Option<String>,
}

/// What a run did.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub records: Vec<StepRecord>,
    pub failures: usize,
    /// Final variable state (captures included).
    pub vars: VarMap,
}

impl WorkflowReport {
    pub fn steps_run(&self) -> usize {
        self.records.len()
    }
}

/// Sequential executor with variable capture and loops.
pub struct WorkflowEngine<E> {
    executor: E,
    options: WorkflowOptions,
}

impl<E: ToolExecutor> WorkflowEngine<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            options: WorkflowOptions::default(),
        }
    }

    pub fn with_options(executor: E, options: WorkflowOptions) -> Self {
        Self { executor, options }
    }

    /// Run a workflow to completion (or first failure under `Stop`).
    pub async fn run(&mut self, steps: &[Step]) -> Result<WorkflowReport, BridgeError> {
        let mut report = WorkflowReport::default();
        let mut vars = VarMap::new();
        let aborted = self.run_steps(steps, &mut vars, &mut report).await?;
        if aborted {
            debug!("workflow stopped early");
        }
        report.vars = vars;
        Ok(report)
    }

    /// Returns `true` when the workflow should stop.
    ///
    /// Boxed (type-erased) so loops can recurse back into step lists.
    fn run_steps<'a>(
        &'a mut self,
        steps: &'a [Step],
        vars: &'a mut VarMap,
        report: &'a mut WorkflowReport,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool, BridgeError>> + Send + 'a>>
    {
        Box::pin(async move {
            for step in steps {
                let stop = match step {
                    Step::Leaf(leaf) => self.run_leaf(leaf, vars, report).await?,
                    Step::Loop(l) => self.run_loop(l, vars, report).await?,
                };
                if stop {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    async fn run_leaf(
        &mut self,
        leaf: &LeafStep,
        vars: &mut VarMap,
        report: &mut WorkflowReport,
    ) -> Result<bool, BridgeError> {
        let tool = resolve_cmd(&leaf.cmd);
        let args = substitute(&leaf.args, vars);
        debug!(cmd = %leaf.cmd, tool, "running step");

        let failure = match self.executor.execute(tool, args).await {
            Ok(resp) if !resp.is_error() => {
                if let Some(name) = &leaf.capture {
                    vars.insert(name.clone(), extract_capture(&resp));
                }
                report.records.push(StepRecord {
                    cmd: leaf.cmd.clone(),
                    ok: true,
                    detail: None,
                });
                self.auto_wait(&leaf.cmd).await;
                return Ok(false);
            }
            Ok(resp) => resp.first_text().unwrap_or("tool error").to_string(),
            Err(e) => e.to_string(),
        };

        warn!(cmd = %leaf.cmd, detail = %failure, "step failed");
        report.records.push(StepRecord {
            cmd: leaf.cmd.clone(),
            ok: false,
            detail: Some(failure),
        });
        report.failures += 1;
        Ok(self.options.on_error == ErrorPolicy::Stop)
    }

    /// Issue the implicit wait for navigation/mutation commands. Failures
    /// are swallowed: an auto-wait is a convenience, never a verdict.
    async fn auto_wait(&mut self, cmd: &str) {
        if !self.options.auto_wait {
            return;
        }
        let wait_tool = if NAVIGATION_CMDS.contains(&cmd) {
            "wait.load"
        } else if MUTATION_CMDS.contains(&cmd) {
            "wait.dom"
        } else {
            return;
        };
        let args = serde_json::json!({ "timeoutMs": self.options.auto_wait_timeout_ms });
        if let Err(e) = self.executor.execute(wait_tool, args).await {
            debug!(cmd, wait_tool, error = %e, "auto-wait failed (ignored)");
        }
    }

    async fn run_loop(
        &mut self,
        l: &LoopStep,
        vars: &mut VarMap,
        report: &mut WorkflowReport,
    ) -> Result<bool, BridgeError> {
        // Resolve the iteration plan up front.
        let items: Vec<Option<Value>> = if let Some(each) = &l.each {
            let resolved = substitute(&Value::String(each.clone()), vars);
            let Value::Array(items) = resolved else {
                return Err(BridgeError::protocol(format!(
                    "each expression {each:?} did not resolve to an array"
                )));
            };
            if items.len() as u64 > MAX_LOOP_ITERATIONS {
                warn!(len = items.len(), "each loop clamped to {MAX_LOOP_ITERATIONS} iterations");
            }
            items
                .into_iter()
                .take(MAX_LOOP_ITERATIONS as usize)
                .map(Some)
                .collect()
        } else {
            let n = l.repeat.unwrap_or(1);
            if n > MAX_LOOP_ITERATIONS {
                warn!(requested = n, "repeat loop clamped to {MAX_LOOP_ITERATIONS} iterations");
            }
            (0..n.min(MAX_LOOP_ITERATIONS)).map(|_| None).collect()
        };

        let bind = l.bind.as_deref().unwrap_or("item");
        for item in items {
            if let Some(value) = item {
                // Captures (and the binding itself) land in the shared map,
                // so inner writes propagate outward, last write wins.
                vars.insert(bind.to_string(), value);
            }
            if self.run_steps(&l.steps, vars, report).await? {
                return Ok(true);
            }
            if let Some(until) = &l.until {
                if self.check_until(until, vars).await {
                    debug!("until condition met, exiting loop");
                    break;
                }
            }
        }
        Ok(false)
    }

    /// Evaluate the loop's exit condition; errors count as "keep looping".
    async fn check_until(&mut self, until: &LeafStep, vars: &VarMap) -> bool {
        let tool = resolve_cmd(&until.cmd);
        let args = substitute(&until.args, vars);
        match self.executor.execute(tool, args).await {
            Ok(resp) if !resp.is_error() => is_truthy(&extract_capture(&resp)),
            Ok(_) | Err(_) => false,
        }
    }
}

/// Workflow command aliases for the most common tools.
fn resolve_cmd(cmd: &str) -> &str {
    match cmd {
        "go" => "navigate",
        "js" => "js.eval",
        "text" => "page.text",
        "read" => "page.read",
        "shot" => "screenshot",
        other => other,
    }
}

/// Reply extraction: a single text part that parses as JSON captures the
/// parsed value; a single text part otherwise captures the raw string; any
/// other shape captures the whole reply object.
fn extract_capture(resp: &ToolResponse) -> Value {
    let texts: Vec<&str> = resp
        .result
        .as_ref()
        .map(|payload| {
            payload
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if texts.len() == 1 {
        let text = texts[0];
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
        return Value::String(text.to_string());
    }
    serde_json::to_value(resp).unwrap_or(Value::Null)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
