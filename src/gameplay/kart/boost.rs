//! Boost accrual state machine. One of three mutually exclusive modes is
//! selected per kart at configuration time; the state itself is plain data
//! stepped by the kart body update.

use crate::config::KartBoostConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostMode {
    DriftAuto,
    DriftManual,
    Manual,
}

impl BoostMode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "drift_manual" => Self::DriftManual,
            "manual" => Self::Manual,
            _ => Self::DriftAuto,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoostParams {
    pub mode: BoostMode,
    pub rate: f32,
    pub interval: f32,
    pub max_boosts: u32,
    pub power: f32,
    pub drive: f32,
    pub reserve_limit: f32,
    pub burn_rate: f32,
    pub amount_limit: f32,
    pub fill_rate: f32,
    pub manual_commit_limit: f32,
    pub manual_fail_cancel: bool,
    pub drift_trickle_rate: f32,
    pub ground_push: f32,
    pub air_push: f32,
}

impl BoostParams {
    pub fn from_config(config: &KartBoostConfig) -> Self {
        Self {
            mode: BoostMode::parse(&config.mode),
            rate: config.rate.max(0.0),
            interval: config.interval.max(0.001),
            max_boosts: config.max_boosts.max(1),
            power: config.power.max(0.0),
            drive: config.drive.max(0.0),
            reserve_limit: config.reserve_limit.max(0.001),
            burn_rate: config.burn_rate.max(0.0),
            amount_limit: config.amount_limit.max(0.0),
            fill_rate: config.fill_rate.max(0.0),
            manual_commit_limit: config.manual_commit_limit.clamp(0.0, 1.0),
            manual_fail_cancel: config.manual_fail_cancel,
            drift_trickle_rate: config.drift_trickle_rate.max(0.0),
            ground_push: config.ground_push.max(0.0),
            air_push: config.air_push.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoostInputs {
    pub drifting: bool,
    pub drift_dir: f32,
    pub boost_held: bool,
    pub boost_just_pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommitOutcome {
    Granted { reserve_added: f32, push: f32 },
    Failed { cancels_drift: bool },
}

#[derive(Debug, Clone, Default)]
pub struct BoostState {
    /// Seconds of boost drive remaining; burned down once per step.
    pub reserve: f32,
    /// Manual-mode fuel pool, filled by pads/trickle and drained while held.
    pub amount: f32,
    pub boost_time: f32,
    pub boost_count: u32,
    pub failed: bool,
    valid_press: bool,
    push_pending: f32,
    fail_pending: bool,
    start_pending: bool,
}

impl BoostState {
    pub fn is_boosting(&self) -> bool {
        self.reserve > 0.0
    }

    pub fn add_reserve(&mut self, added: f32, params: &BoostParams) {
        self.reserve = (self.reserve + added.max(0.0)).clamp(0.0, params.reserve_limit);
    }

    pub fn add_amount(&mut self, added: f32, params: &BoostParams) {
        self.amount = (self.amount + added.max(0.0)).clamp(0.0, params.amount_limit);
    }

    /// Grants reserve plus an immediate forward velocity change, as boost
    /// pads and items do.
    pub fn add_boost(&mut self, reserve_added: f32, push: f32, params: &BoostParams) {
        self.add_reserve(reserve_added, params);
        self.push_pending += push.max(0.0);
        self.start_pending = true;
    }

    pub fn empty_reserve(&mut self) {
        self.reserve = 0.0;
    }

    /// Spin-outs and hard wall hits cancel everything in flight.
    pub fn cancel(&mut self) {
        self.boost_time = 0.0;
        self.boost_count = 0;
        self.failed = false;
        self.valid_press = false;
        self.push_pending = 0.0;
        self.reserve = 0.0;
    }

    /// Velocity-change magnitude accumulated since the last take. The body
    /// update drains this once per step.
    pub fn take_push(&mut self) -> f32 {
        std::mem::take(&mut self.push_pending)
    }

    pub fn take_fail_event(&mut self) -> bool {
        std::mem::take(&mut self.fail_pending)
    }

    pub fn take_start_event(&mut self) -> bool {
        std::mem::take(&mut self.start_pending)
    }

    pub fn step(&mut self, params: &BoostParams, inputs: BoostInputs, dt: f32) {
        if self.reserve > 0.0 {
            self.reserve = (self.reserve - dt).max(0.0);
        }

        match params.mode {
            BoostMode::DriftAuto => {
                if inputs.drifting && inputs.drift_dir != 0.0 && !self.failed {
                    self.boost_time += params.rate * dt;
                    self.boost_count =
                        ((self.boost_time / params.interval) as u32).min(params.max_boosts);
                }
            }
            BoostMode::DriftManual => {
                if inputs.drifting && !self.failed {
                    self.boost_time = (self.boost_time + params.rate * dt).clamp(0.0, 1.0);
                    if inputs.boost_just_pressed {
                        self.commit(params);
                    } else if self.boost_time >= 1.0
                        || self.boost_count > params.max_boosts.saturating_sub(1)
                    {
                        self.fail(params);
                    }
                }
            }
            BoostMode::Manual => {
                if inputs.boost_just_pressed && self.amount > 0.0 {
                    self.valid_press = true;
                    self.start_pending = true;
                }
                if !inputs.boost_held {
                    self.valid_press = false;
                }
                if inputs.boost_held && self.valid_press && self.amount > 0.0 {
                    self.amount = (self.amount - params.burn_rate * dt).max(0.0);
                    self.add_reserve(params.fill_rate * dt, params);
                    if self.amount <= 0.0 {
                        self.valid_press = false;
                    }
                }
                if inputs.drifting {
                    self.add_amount(params.drift_trickle_rate * dt, params);
                }
            }
        }
    }

    /// Drift released. DriftAuto converts the accrued count into reserve and
    /// a push; DriftManual just resets its in-drift bookkeeping.
    pub fn end_drift(&mut self, params: &BoostParams) {
        match params.mode {
            BoostMode::DriftAuto => {
                if self.boost_time > 0.0 && self.boost_count > 0 {
                    let count = self.boost_count as f32;
                    self.add_boost(count * params.power, count, params);
                }
                self.boost_time = 0.0;
                self.boost_count = 0;
                self.failed = false;
            }
            BoostMode::DriftManual => {
                self.boost_time = 0.0;
                self.boost_count = 0;
                self.failed = false;
            }
            BoostMode::Manual => {}
        }
    }

    /// DriftManual commit press.
    pub fn commit(&mut self, params: &BoostParams) -> CommitOutcome {
        if self.boost_time >= params.manual_commit_limit {
            self.boost_count = (self.boost_count + 1).min(params.max_boosts);
            let push = self.boost_count as f32;
            let reserve_added = self.boost_time * push * params.power;
            self.add_boost(reserve_added, push, params);
            self.boost_time = 0.0;
            CommitOutcome::Granted {
                reserve_added,
                push,
            }
        } else {
            self.fail(params)
        }
    }

    fn fail(&mut self, params: &BoostParams) -> CommitOutcome {
        self.fail_pending = true;
        if params.manual_fail_cancel {
            self.boost_time = 0.0;
            self.boost_count = 0;
            self.failed = true;
            CommitOutcome::Failed {
                cancels_drift: true,
            }
        } else {
            self.boost_count = (self.boost_count + 1).min(params.max_boosts);
            self.boost_time = 0.0;
            CommitOutcome::Failed {
                cancels_drift: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drift_auto_params() -> BoostParams {
        BoostParams {
            mode: BoostMode::DriftAuto,
            rate: 1.0,
            interval: 1.0,
            max_boosts: 3,
            power: 0.5,
            drive: 0.4,
            reserve_limit: 10.0,
            burn_rate: 1.0,
            amount_limit: 2.0,
            fill_rate: 1.5,
            manual_commit_limit: 0.4,
            manual_fail_cancel: true,
            drift_trickle_rate: 0.0,
            ground_push: 0.0,
            air_push: 0.0,
        }
    }

    fn drifting_inputs() -> BoostInputs {
        BoostInputs {
            drifting: true,
            drift_dir: 1.0,
            boost_held: false,
            boost_just_pressed: false,
        }
    }

    #[test]
    fn drift_auto_accrues_capped_count_and_grants_on_release() {
        let params = drift_auto_params();
        let mut state = BoostState::default();

        // 3.5 seconds of continuous drift in exact half-second steps.
        for _ in 0..7 {
            state.step(&params, drifting_inputs(), 0.5);
        }
        assert_eq!(state.boost_count, 3);

        state.end_drift(&params);
        assert!((state.reserve - 3.0 * params.power).abs() < 1e-6);
        assert!((state.take_push() - 3.0).abs() < 1e-6);
        assert_eq!(state.boost_count, 0);
        assert_eq!(state.boost_time, 0.0);
    }

    #[test]
    fn drift_auto_release_with_no_accrual_grants_nothing() {
        let params = drift_auto_params();
        let mut state = BoostState::default();

        state.end_drift(&params);
        assert_eq!(state.reserve, 0.0);
        assert_eq!(state.take_push(), 0.0);
    }

    #[test]
    fn reserve_and_amount_stay_within_bounds_for_any_sequence() {
        let params = drift_auto_params();
        let mut state = BoostState::default();

        let operations: [f32; 8] = [5.0, -1.0, 100.0, 0.0, 2.5, -50.0, 0.001, 9.9];
        for value in operations {
            state.add_reserve(value, &params);
            state.add_amount(value, &params);
            assert!(state.reserve >= 0.0 && state.reserve <= params.reserve_limit);
            assert!(state.amount >= 0.0 && state.amount <= params.amount_limit);

            state.step(
                &params,
                BoostInputs {
                    drifting: false,
                    drift_dir: 0.0,
                    boost_held: false,
                    boost_just_pressed: false,
                },
                0.25,
            );
            assert!(state.reserve >= 0.0 && state.reserve <= params.reserve_limit);
        }
    }

    #[test]
    fn drift_manual_commit_grants_above_limit_and_fails_below() {
        let mut params = drift_auto_params();
        params.mode = BoostMode::DriftManual;
        let mut state = BoostState::default();

        // Not enough charge yet: failing with fail-cancel set cancels drift.
        state.boost_time = 0.2;
        let outcome = state.commit(&params);
        assert_eq!(
            outcome,
            CommitOutcome::Failed {
                cancels_drift: true
            }
        );
        assert!(state.failed);
        assert!(state.take_fail_event());

        // A fresh drift charges past the limit and commits.
        let mut state = BoostState::default();
        state.boost_time = 0.6;
        let outcome = state.commit(&params);
        match outcome {
            CommitOutcome::Granted {
                reserve_added,
                push,
            } => {
                assert!((reserve_added - 0.6 * 1.0 * params.power).abs() < 1e-6);
                assert_eq!(push, 1.0);
            }
            CommitOutcome::Failed { .. } => panic!("commit above the limit must grant"),
        }
        assert_eq!(state.boost_count, 1);
        assert_eq!(state.boost_time, 0.0);
    }

    #[test]
    fn drift_manual_overcharge_auto_fails() {
        let mut params = drift_auto_params();
        params.mode = BoostMode::DriftManual;
        params.rate = 4.0;
        let mut state = BoostState::default();

        for _ in 0..4 {
            state.step(&params, drifting_inputs(), 0.1);
        }
        // boost_time clamped to 1.0 trips the auto-fail.
        assert!(state.failed);
        assert!(state.take_fail_event());
    }

    #[test]
    fn manual_mode_requires_a_fresh_press_after_exhaustion() {
        let mut params = drift_auto_params();
        params.mode = BoostMode::Manual;
        params.burn_rate = 1.0;
        params.amount_limit = 0.5;
        let mut state = BoostState::default();
        state.amount = 0.5;

        let held_first = BoostInputs {
            drifting: false,
            drift_dir: 0.0,
            boost_held: true,
            boost_just_pressed: true,
        };
        let held = BoostInputs {
            boost_just_pressed: false,
            ..held_first
        };

        state.step(&params, held_first, 0.25);
        state.step(&params, held, 0.25);
        assert_eq!(state.amount, 0.0);
        assert!(state.reserve > 0.0);

        // Refilled, but the stale hold must not drain it.
        state.add_amount(0.5, &params);
        let reserve_before = state.reserve;
        state.step(&params, held, 0.25);
        assert_eq!(state.amount, 0.5);
        assert!(state.reserve <= reserve_before);
    }

    #[test]
    fn cancel_clears_everything() {
        let params = drift_auto_params();
        let mut state = BoostState::default();
        state.add_boost(2.0, 2.0, &params);
        state.boost_time = 0.7;
        state.boost_count = 2;

        state.cancel();
        assert_eq!(state.reserve, 0.0);
        assert_eq!(state.boost_time, 0.0);
        assert_eq!(state.boost_count, 0);
        assert_eq!(state.take_push(), 0.0);
    }
}
