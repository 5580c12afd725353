//! The fixed agent DAG.
//!
//! ```text
//!         ┌──► intent ──┐
//! analysis┼──► risk ────┼──► review ──┬──► tests
//!         └──► context ─┘             ├──► docs
//!                                     └──► synthesis (fan-in)
//! ```
//!
//! The registry is a static table of descriptors; execution dispatches over
//! agent names, never over trait objects.

use std::time::Duration;

/// Default timeout for cheap metadata agents.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for LLM-heavy agents.
const LLM_TIMEOUT: Duration = Duration::from_secs(180);

/// Static description of one agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentDescriptor {
    pub name: &'static str,
    pub deps: &'static [&'static str],
    pub timeout: Duration,
    /// Non-critical agents are skipped when the token budget runs out.
    pub critical: bool,
    /// Synthesis runs even when predecessors failed (best-effort fan-in).
    pub best_effort: bool,
}

/// Registry in topological order.
pub const REGISTRY: &[AgentDescriptor] = &[
    AgentDescriptor {
        name: "analysis",
        deps: &[],
        timeout: DEFAULT_TIMEOUT,
        critical: true,
        best_effort: false,
    },
    AgentDescriptor {
        name: "intent",
        deps: &["analysis"],
        timeout: LLM_TIMEOUT,
        critical: true,
        best_effort: false,
    },
    AgentDescriptor {
        name: "risk",
        deps: &["analysis"],
        timeout: DEFAULT_TIMEOUT,
        critical: true,
        best_effort: false,
    },
    AgentDescriptor {
        name: "context",
        deps: &["analysis"],
        timeout: DEFAULT_TIMEOUT,
        critical: true,
        best_effort: false,
    },
    AgentDescriptor {
        name: "review",
        deps: &["risk", "context"],
        timeout: LLM_TIMEOUT,
        critical: true,
        best_effort: false,
    },
    AgentDescriptor {
        name: "tests",
        deps: &["review"],
        timeout: LLM_TIMEOUT,
        critical: false,
        best_effort: false,
    },
    AgentDescriptor {
        name: "docs",
        deps: &["review"],
        timeout: LLM_TIMEOUT,
        critical: false,
        best_effort: false,
    },
    AgentDescriptor {
        name: "synthesis",
        deps: &["review"],
        timeout: LLM_TIMEOUT,
        critical: true,
        best_effort: true,
    },
];

/// Look up a descriptor by name.
pub fn descriptor(name: &str) -> Option<&'static AgentDescriptor> {
    REGISTRY.iter().find(|d| d.name == name)
}

/// Names in topological order.
pub fn topo_order() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|d| d.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_is_topologically_ordered() {
        let mut seen = HashSet::new();
        for desc in REGISTRY {
            for dep in desc.deps {
                assert!(
                    seen.contains(dep),
                    "{} depends on {} which is not earlier in the registry",
                    desc.name,
                    dep
                );
            }
            seen.insert(desc.name);
        }
    }

    #[test]
    fn deps_exist_and_names_are_unique() {
        let names: HashSet<&str> = REGISTRY.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), REGISTRY.len());
        for desc in REGISTRY {
            for dep in desc.deps {
                assert!(names.contains(dep), "unknown dep {dep}");
            }
        }
    }

    #[test]
    fn llm_agents_get_the_long_timeout() {
        for name in ["intent", "review", "tests", "docs", "synthesis"] {
            assert_eq!(descriptor(name).unwrap().timeout, LLM_TIMEOUT);
        }
        assert_eq!(descriptor("analysis").unwrap().timeout, DEFAULT_TIMEOUT);
        assert_eq!(descriptor("risk").unwrap().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn only_synthesis_is_best_effort() {
        for desc in REGISTRY {
            assert_eq!(desc.best_effort, desc.name == "synthesis");
        }
    }
}
