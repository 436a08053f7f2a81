//! ALUA promote/demote state machine
//!
//! A transition is a polling loop: observe the resource, decide one step,
//! act, observe again. Decisions live in `next_step` so they can be checked
//! without a tree or a clock; `drive` adds pacing and the attempt bound.

use crate::config::PromotionConfig;
use crate::lio::AccessState;
use crate::ocf::OcfStatus;
use std::time::Duration;

/// Which way a transition goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Promote,
    Demote,
}

impl Direction {
    /// Access state written to move towards the goal
    pub fn target_state(self) -> AccessState {
        match self {
            Direction::Promote => AccessState::ActiveOptimized,
            Direction::Demote => AccessState::Standby,
        }
    }

    /// Probe result once the goal is reached
    pub fn goal(self) -> OcfStatus {
        match self {
            Direction::Promote => OcfStatus::RunningMaster,
            Direction::Demote => OcfStatus::Success,
        }
    }
}

/// What to do after one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write this access state (and its preferred flag), then observe again
    Apply(AccessState),
    Complete,
    /// Not actionable yet; observe again after the poll interval
    Wait,
    /// Cannot succeed from here
    Abort,
}

pub fn next_step(direction: Direction, observed: OcfStatus) -> Step {
    if observed == direction.goal() {
        return Step::Complete;
    }

    match observed {
        // Slave while promoting, master while demoting, or inconsistent
        OcfStatus::Success | OcfStatus::RunningMaster | OcfStatus::FailedMaster => {
            Step::Apply(direction.target_state())
        }
        // Present but not configured; the kernel may still be settling
        OcfStatus::GenericError => Step::Wait,
        _ => Step::Abort,
    }
}

/// Sleeps between polls
pub trait Pacer: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run one transition to completion.
///
/// `probe` observes the resource, `apply` writes an access state. Returns
/// `Success` once the goal is observed. Any terminal failure (abort, probe
/// or write error, attempts exhausted) sleeps the failure penalty first so
/// the cluster manager does not retry straight away.
pub fn drive<P, A>(
    direction: Direction,
    pacing: &PromotionConfig,
    pacer: &dyn Pacer,
    mut probe: P,
    mut apply: A,
) -> anyhow::Result<OcfStatus>
where
    P: FnMut() -> anyhow::Result<OcfStatus>,
    A: FnMut(AccessState) -> anyhow::Result<()>,
{
    let penalize = || pacer.sleep(pacing.failure_penalty());

    for attempt in 1..=pacing.max_attempts {
        if attempt > 1 {
            pacer.sleep(pacing.poll_interval());
        }

        let observed = match probe() {
            Ok(status) => status,
            Err(e) => {
                penalize();
                return Err(e);
            }
        };

        let step = next_step(direction, observed);
        log::debug!(
            "{:?} attempt {}: observed {}, next {:?}",
            direction,
            attempt,
            observed,
            step
        );

        match step {
            Step::Complete => return Ok(OcfStatus::Success),
            Step::Wait => {}
            Step::Abort => {
                log::error!("Cannot {:?} a resource in state {}", direction, observed);
                penalize();
                return Ok(OcfStatus::GenericError);
            }
            Step::Apply(state) => {
                log::info!("{:?}: setting ALUA access state {:?}", direction, state);
                if let Err(e) = apply(state) {
                    penalize();
                    return Err(e);
                }
            }
        }
    }

    log::error!(
        "{:?} did not complete after {} attempts",
        direction,
        pacing.max_attempts
    );
    penalize();
    Ok(OcfStatus::GenericError)
}
