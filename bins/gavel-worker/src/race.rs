/// Deadline Race - Completion vs. Timeout
///
/// Races "the sandbox exited on its own" against "the deadline elapsed" and
/// resolves to exactly one outcome. The losing branch is abandoned, and a
/// single-resolution latch guarantees it can never apply effects after the
/// race has been decided. On timeout the sandbox is killed and released
/// here, best-effort.
use crate::sandbox::Sandbox;
use gavel_common::types::Language;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    Completed,
    TimedOut,
}

/// Decides a two-party race exactly once.
///
/// Both branches call `try_decide`; only the first caller wins. A fired
/// timer cannot retroactively un-timeout a finished wait, and a late
/// natural exit after a timeout is a no-op.
pub struct DecisionLatch {
    decided: AtomicBool,
}

impl DecisionLatch {
    pub fn new() -> Self {
        DecisionLatch {
            decided: AtomicBool::new(false),
        }
    }

    /// Returns true for the first caller only.
    pub fn try_decide(&self) -> bool {
        self.decided
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Deadline policy: a configured base duration plus per-language extensions
/// from a table, so slow-cold-start runtimes get their allowance as data
/// rather than as a conditional.
#[derive(Debug, Clone)]
pub struct DeadlinePolicy {
    base: Duration,
    extensions: HashMap<Language, u64>,
}

impl DeadlinePolicy {
    pub fn new(base_ms: u64, extensions: HashMap<Language, u64>) -> Self {
        DeadlinePolicy {
            base: Duration::from_millis(base_ms),
            extensions,
        }
    }

    pub fn deadline_for(&self, language: Language) -> Duration {
        let extension_ms = self.extensions.get(&language).copied().unwrap_or(0);
        self.base + Duration::from_millis(extension_ms)
    }
}

/// Race the sandbox against the deadline.
///
/// TimedOut terminates and releases the sandbox before returning; a sandbox
/// that cannot be killed is not itself a job failure. Completed leaves
/// teardown to the caller, who releases unconditionally after the race.
pub async fn race(sandbox: &dyn Sandbox, deadline: Duration) -> RaceOutcome {
    let latch = DecisionLatch::new();

    tokio::select! {
        _ = sandbox.wait_for_exit() => {
            if latch.try_decide() {
                RaceOutcome::Completed
            } else {
                RaceOutcome::TimedOut
            }
        }
        _ = tokio::time::sleep(deadline) => {
            if latch.try_decide() {
                warn!(deadline_ms = deadline.as_millis() as u64, "sandbox deadline elapsed");
                sandbox.terminate().await;
                sandbox.release().await;
                RaceOutcome::TimedOut
            } else {
                RaceOutcome::Completed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::{FakeSandbox, FakeState};
    use std::sync::Arc;

    #[test]
    fn test_latch_decides_once() {
        let latch = DecisionLatch::new();
        assert!(latch.try_decide());
        assert!(!latch.try_decide());
        assert!(!latch.try_decide());
    }

    #[test]
    fn test_latch_single_winner_under_contention() {
        let latch = Arc::new(DecisionLatch::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let latch = Arc::clone(&latch);
            handles.push(std::thread::spawn(move || latch.try_decide()));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_deadline_policy_table() {
        let mut extensions = HashMap::new();
        extensions.insert(Language::Java, 2000);
        let policy = DeadlinePolicy::new(10_000, extensions);

        assert_eq!(policy.deadline_for(Language::Java), Duration::from_millis(12_000));
        assert_eq!(policy.deadline_for(Language::Python), Duration::from_millis(10_000));
        assert_eq!(policy.deadline_for(Language::C), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn test_race_completes_before_deadline() {
        let state = FakeState::new("ok---1---", Duration::from_millis(5));
        let sandbox = FakeSandbox {
            state: Arc::clone(&state),
        };

        let outcome = race(&sandbox, Duration::from_millis(500)).await;

        assert_eq!(outcome, RaceOutcome::Completed);
        // Natural completion must not tear the sandbox down here.
        assert_eq!(state.terminates.load(Ordering::SeqCst), 0);
        assert_eq!(state.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_race_times_out_and_tears_down() {
        let state = FakeState::new("", Duration::from_secs(60));
        let sandbox = FakeSandbox {
            state: Arc::clone(&state),
        };

        let outcome = race(&sandbox, Duration::from_millis(20)).await;

        assert_eq!(outcome, RaceOutcome::TimedOut);
        assert_eq!(state.terminates.load(Ordering::SeqCst), 1);
        assert_eq!(state.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_deadline_still_resolves_once() {
        let state = FakeState::new("", Duration::from_secs(60));
        let sandbox = FakeSandbox {
            state: Arc::clone(&state),
        };

        let outcome = race(&sandbox, Duration::from_millis(0)).await;

        assert_eq!(outcome, RaceOutcome::TimedOut);
        assert_eq!(state.terminates.load(Ordering::SeqCst), 1);
    }
}
