//! Session-scoped approval decisions.

use crate::{AutoApprovePolicy, Decision};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

/// Outcome of asking to prompt for a category.
pub enum PromptTicket {
    /// A decision already exists; no prompt needed.
    Decided(Decision),

    /// This caller owns the prompt. It must call
    /// [`SessionApprovals::resolve`] exactly once with the outcome.
    Leader,

    /// Another request is already prompting for this category; await the
    /// shared resolution. A closed channel means the leader gave up
    /// (elicitation timeout) without a decision.
    Follower(watch::Receiver<Option<bool>>),
}

/// Approval decisions for one session.
///
/// INVARIANT: the internal locks are held only for brief map operations,
/// never across an await point. Waiting for a pending prompt happens on the
/// watch channel outside the lock.
#[derive(Debug)]
pub struct SessionApprovals {
    decisions: Mutex<HashMap<String, Decision>>,
    pending: Mutex<HashMap<String, watch::Sender<Option<bool>>>>,
}

impl SessionApprovals {
    /// Create the session state, applying the auto-approve policy to the
    /// known category ids.
    pub fn new<'a>(
        policy: &AutoApprovePolicy,
        known_categories: impl Iterator<Item = &'a str>,
    ) -> Self {
        let mut decisions = HashMap::new();
        for id in known_categories {
            let decision = if policy.approve_all || policy.categories.iter().any(|c| c == id) {
                Decision::Approved
            } else {
                Decision::Unasked
            };
            decisions.insert(id.to_string(), decision);
        }
        Self {
            decisions: Mutex::new(decisions),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Current decision for a category (Unasked for unknown ids).
    pub fn decision(&self, category: &str) -> Decision {
        self.decisions
            .lock()
            .expect("approval decisions lock poisoned")
            .get(category)
            .copied()
            .unwrap_or(Decision::Unasked)
    }

    /// Record a final decision for a category.
    pub fn record(&self, category: &str, approved: bool) {
        let decision = if approved {
            Decision::Approved
        } else {
            Decision::Denied
        };
        self.decisions
            .lock()
            .expect("approval decisions lock poisoned")
            .insert(category.to_string(), decision);
    }

    /// Claim or join the prompt for a category.
    pub fn begin_prompt(&self, category: &str) -> PromptTicket {
        match self.decision(category) {
            Decision::Unasked => {}
            decided => return PromptTicket::Decided(decided),
        }

        let mut pending = self.pending.lock().expect("approval pending lock poisoned");
        if let Some(tx) = pending.get(category) {
            return PromptTicket::Follower(tx.subscribe());
        }

        let (tx, _rx) = watch::channel(None);
        pending.insert(category.to_string(), tx);
        PromptTicket::Leader
    }

    /// Resolve a prompt owned by this caller.
    ///
    /// `outcome == None` means the user never answered (elicitation
    /// timeout): the call is denied but the stored state stays `Unasked`
    /// so a later call re-prompts.
    pub fn resolve(&self, category: &str, outcome: Option<bool>) {
        if let Some(approved) = outcome {
            self.record(category, approved);
        }

        let tx = self
            .pending
            .lock()
            .expect("approval pending lock poisoned")
            .remove(category);

        if let Some(tx) = tx {
            if let Some(approved) = outcome {
                let _ = tx.send(Some(approved));
            }
            // Dropping the sender wakes followers with a closed channel.
        }
    }

    /// Snapshot of all recorded decisions (for diagnostics/resources).
    pub fn snapshot(&self) -> HashMap<String, Decision> {
        self.decisions
            .lock()
            .expect("approval decisions lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<&'static str> {
        vec!["file_operations", "package_installation", "system_operations"]
    }

    #[test]
    fn test_auto_approve_all() {
        let policy = AutoApprovePolicy {
            approve_all: true,
            categories: vec![],
        };
        let approvals = SessionApprovals::new(&policy, ids().into_iter());
        assert_eq!(approvals.decision("file_operations"), Decision::Approved);
        assert_eq!(approvals.decision("system_operations"), Decision::Approved);
    }

    #[test]
    fn test_auto_approve_selected() {
        let policy = AutoApprovePolicy {
            approve_all: false,
            categories: vec!["file_operations".to_string()],
        };
        let approvals = SessionApprovals::new(&policy, ids().into_iter());
        assert_eq!(approvals.decision("file_operations"), Decision::Approved);
        assert_eq!(approvals.decision("package_installation"), Decision::Unasked);
    }

    #[test]
    fn test_decisions_are_memoized() {
        let approvals = SessionApprovals::new(&AutoApprovePolicy::default(), ids().into_iter());
        approvals.record("file_operations", false);
        assert_eq!(approvals.decision("file_operations"), Decision::Denied);

        match approvals.begin_prompt("file_operations") {
            PromptTicket::Decided(Decision::Denied) => {}
            _ => panic!("expected memoized denial"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_prompts_share_resolution() {
        let approvals = SessionApprovals::new(&AutoApprovePolicy::default(), ids().into_iter());

        let leader = approvals.begin_prompt("file_operations");
        assert!(matches!(leader, PromptTicket::Leader));

        let follower = approvals.begin_prompt("file_operations");
        let mut rx = match follower {
            PromptTicket::Follower(rx) => rx,
            _ => panic!("expected follower"),
        };

        approvals.resolve("file_operations", Some(true));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(true));
        assert_eq!(approvals.decision("file_operations"), Decision::Approved);
    }

    #[tokio::test]
    async fn test_timeout_leaves_state_unasked() {
        let approvals = SessionApprovals::new(&AutoApprovePolicy::default(), ids().into_iter());

        assert!(matches!(
            approvals.begin_prompt("system_operations"),
            PromptTicket::Leader
        ));
        let mut rx = match approvals.begin_prompt("system_operations") {
            PromptTicket::Follower(rx) => rx,
            _ => panic!("expected follower"),
        };

        // Leader gave up without an answer.
        approvals.resolve("system_operations", None);
        assert!(rx.changed().await.is_err());
        assert_eq!(approvals.decision("system_operations"), Decision::Unasked);

        // Next request prompts again.
        assert!(matches!(
            approvals.begin_prompt("system_operations"),
            PromptTicket::Leader
        ));
    }
}
