//! Client-side workflow engine.
//!
//! Consumes an ordered list of steps, resolves `%{name}` variables against a
//! rolling map, issues each leaf as one tool request to the bridge, and
//! captures replies for later steps. Loops (`repeat` / `each`) cap at 100
//! iterations; navigation- and mutation-inducing commands are followed by an
//! implicit wait whose failure is swallowed.

pub mod engine;
pub mod step;
pub mod vars;

pub use engine::{ErrorPolicy, ToolExecutor, WorkflowEngine, WorkflowOptions, WorkflowReport};
pub use step::{LeafStep, LoopStep, Step, MAX_LOOP_ITERATIONS};
pub use vars::{substitute, VarMap};
