//! Fixed-sequence pipeline executor.
//!
//! Agents run strictly in order, one at a time, each observing exactly the
//! mutations of its predecessor. After every agent the shared state is
//! re-validated; a violation is fatal. A fatal failure halts the pipeline,
//! records `"<Agent>: <message>"` on the state exactly once, and returns
//! the partial state rather than losing it.

use std::time::Instant;

use tracing::{error, info};

use crate::agents::Agent;
use crate::state::SharedState;

/// Runs a fixed agent sequence over one shared state.
pub struct PipelineExecutor {
    agents: Vec<Box<dyn Agent>>,
}

impl PipelineExecutor {
    /// Creates an executor over the given agent sequence. The order of
    /// `agents` is the execution order; nothing is skipped, reordered, or
    /// run concurrently.
    #[must_use]
    pub fn new(agents: Vec<Box<dyn Agent>>) -> Self {
        Self { agents }
    }

    /// Names of the agents in execution order.
    #[must_use]
    pub fn agent_names(&self) -> Vec<&'static str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Executes the pipeline. Always returns a state: the final one on
    /// success, the partial one (with `error` set) on fatal failure.
    pub async fn execute(&self, initial_state: SharedState) -> SharedState {
        let mut state = initial_state;

        for agent in &self.agents {
            let name = agent.name();
            info!(agent = name, execution_id = %state.execution_id, "agent_start");
            let started = Instant::now();

            // Keep a copy so a failing agent cannot destroy the progress of
            // its predecessors.
            let before = state.clone();
            match agent.run(state).await {
                Ok(updated) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    if let Err(violation) = updated.validate() {
                        error!(
                            agent = name,
                            status = "error",
                            duration_ms,
                            error = %violation,
                            "agent_end"
                        );
                        state = before;
                        state.record_error(name, format!("state validation failed: {violation}"));
                        return state;
                    }
                    info!(agent = name, status = "ok", duration_ms, "agent_end");
                    state = updated;
                }
                Err(err) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    error!(
                        agent = name,
                        status = "error",
                        duration_ms,
                        error = %err,
                        "agent_end"
                    );
                    state = before;
                    state.record_error(name, err);
                    return state;
                }
            }
        }

        state
    }
}
