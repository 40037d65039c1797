// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Exponential-backoff restart supervisor for a single container. One
//! [`RestartSupervisor`] per container; containers restart
//! independently of each other, and nothing here blocks a caller
//! beyond the sleep between a container's own attempts.

use crate::domain::container::RestartPolicy;
use std::time::Duration;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Minimum contiguous run duration that resets backoff to
/// [`INITIAL_BACKOFF`]. Twice the backoff cap is long enough that 8
/// back-to-back short failures would have saturated backoff first,
/// and is simple to reason about.
pub const STABILITY_WINDOW: Duration = Duration::from_secs(20);

/// Outcome of one supervised run, reported by the caller that actually
/// spawned and waited on the container process.
pub struct RunOutcome {
    pub exit_code: i32,
    pub manually_stopped: bool,
    pub ran_for: Duration,
}

/// What the supervisor wants the caller to do next.
pub enum Decision {
    /// Wait `delay`, then run the container again.
    RestartAfter(Duration),
    /// Leave the container stopped.
    Stop,
}

/// Tracks one container's backoff state across restarts. Not `Sync`
/// itself — callers run one supervisor loop per container and talk to
/// this type from that single task.
pub struct RestartSupervisor {
    policy: RestartPolicy,
    next_backoff: Duration,
}

impl RestartSupervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy, next_backoff: INITIAL_BACKOFF }
    }

    /// Feed in the outcome of the run that just ended and get back
    /// whether/when to restart.
    pub fn evaluate(&mut self, outcome: RunOutcome) -> Decision {
        if outcome.ran_for >= STABILITY_WINDOW {
            self.next_backoff = INITIAL_BACKOFF;
        }

        if !self.policy.should_restart(outcome.exit_code, outcome.manually_stopped) {
            return Decision::Stop;
        }

        let delay = self.next_backoff;
        self.next_backoff = (self.next_backoff * 2).min(MAX_BACKOFF);
        Decision::RestartAfter(delay)
    }

    pub fn current_backoff(&self) -> Duration {
        self.next_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i32, ran_for: Duration) -> RunOutcome {
        RunOutcome { exit_code, manually_stopped: false, ran_for }
    }

    #[test]
    fn backoff_doubles_and_saturates_at_cap() {
        let mut sup = RestartSupervisor::new(RestartPolicy::Always);
        let mut delays = Vec::new();
        for _ in 0..8 {
            match sup.evaluate(outcome(1, Duration::from_millis(1))) {
                Decision::RestartAfter(d) => delays.push(d),
                Decision::Stop => panic!("always policy should always restart"),
            }
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
                Duration::from_millis(3200),
                Duration::from_millis(6400),
                Duration::from_secs(10),
            ]
        );
    }

    #[test]
    fn long_run_resets_backoff_to_initial() {
        let mut sup = RestartSupervisor::new(RestartPolicy::Always);
        for _ in 0..5 {
            sup.evaluate(outcome(1, Duration::from_millis(1)));
        }
        assert!(sup.current_backoff() > INITIAL_BACKOFF);

        match sup.evaluate(outcome(1, STABILITY_WINDOW + Duration::from_secs(1))) {
            Decision::RestartAfter(d) => assert_eq!(d, INITIAL_BACKOFF),
            Decision::Stop => panic!("always policy should always restart"),
        }
    }

    #[test]
    fn no_policy_never_restarts() {
        let mut sup = RestartSupervisor::new(RestartPolicy::No);
        assert!(matches!(sup.evaluate(outcome(1, Duration::ZERO)), Decision::Stop));
    }

    #[test]
    fn on_failure_policy_stops_on_clean_exit() {
        let mut sup = RestartSupervisor::new(RestartPolicy::OnFailure);
        assert!(matches!(sup.evaluate(outcome(0, Duration::ZERO)), Decision::Stop));
    }

    #[test]
    fn on_failure_policy_restarts_on_nonzero_exit() {
        let mut sup = RestartSupervisor::new(RestartPolicy::OnFailure);
        assert!(matches!(sup.evaluate(outcome(1, Duration::ZERO)), Decision::RestartAfter(_)));
    }

    #[test]
    fn always_policy_respects_manual_stop() {
        let mut sup = RestartSupervisor::new(RestartPolicy::Always);
        let outcome = RunOutcome { exit_code: 0, manually_stopped: true, ran_for: Duration::ZERO };
        assert!(matches!(sup.evaluate(outcome), Decision::Stop));
    }
}
