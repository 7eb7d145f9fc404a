//! Process-wide kill-switch toggles, consulted by the AAA pipeline and the
//! tool router. Backed by a copy-on-write map so the hot
//! path reads lock-free.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Debug, Clone, Default)]
struct KillSwitchState {
    blocked_mcps: HashSet<String>,
}

/// Lock-free reads via [`ArcSwap::load`]; writes clone-and-swap the whole map.
#[derive(Default)]
pub struct KillSwitchRegistry {
    state: ArcSwap<KillSwitchState>,
}

impl KillSwitchRegistry {
    pub fn new() -> Self {
        Self { state: ArcSwap::from_pointee(KillSwitchState::default()) }
    }

    pub fn is_blocked(&self, mcp_name: &str) -> bool {
        self.state.load().blocked_mcps.contains(mcp_name)
    }

    pub fn block(&self, mcp_name: &str) {
        self.state.rcu(|current| {
            let mut next = (**current).clone();
            next.blocked_mcps.insert(mcp_name.to_string());
            Arc::new(next)
        });
    }

    pub fn unblock(&self, mcp_name: &str) {
        self.state.rcu(|current| {
            let mut next = (**current).clone();
            next.blocked_mcps.remove(mcp_name);
            Arc::new(next)
        });
    }

    pub fn blocked_mcps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.load().blocked_mcps.iter().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_and_unblocks() {
        let registry = KillSwitchRegistry::new();
        assert!(!registry.is_blocked("fs"));
        registry.block("fs");
        assert!(registry.is_blocked("fs"));
        registry.unblock("fs");
        assert!(!registry.is_blocked("fs"));
    }

    #[test]
    fn blocked_mcps_sorted() {
        let registry = KillSwitchRegistry::new();
        registry.block("zeta");
        registry.block("alpha");
        assert_eq!(registry.blocked_mcps(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
