//! Tick-driven step scheduler. A timeline never blocks: it records what
//! it is waiting for and re-checks on every `tick(now)` from the runner
//! loop. Cancellation releases any wait registration synchronously.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bus::SubscriptionToken;
use crate::config::TimelineTemplate;
use crate::scene::VariableScope;
use crate::timeline::step::{ConditionSet, EndRule, StartGate, Step, StepAction};
use crate::trail::CausalTrail;

/// Completed steps per tick. Caps zero-delay chains (and zero-delay
/// loops) so one timeline cannot starve the tick loop.
const MAX_COMPLETIONS_PER_TICK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineState {
    Idle,
    Running,
}

/// What the in-flight step is currently blocked on
enum WaitState {
    Deadline(Instant),
    Until(ConditionSet),
    While(ConditionSet),
    Event {
        token: SubscriptionToken,
        fired: Arc<AtomicBool>,
    },
}

struct ActiveStep {
    index: usize,
    wait: WaitState,
    iterations_done: u32,
    /// Set at arm time for Duration end rules
    repeat_deadline: Option<Instant>,
}

/// An ordered sequence of steps driven against one scene
pub struct Timeline {
    name: String,
    steps: Vec<Step>,
    looping: bool,
    state: TimelineState,
    queue: VecDeque<usize>,
    active: Option<ActiveStep>,
    loop_count: u32,
}

impl Timeline {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, looping: bool) -> Timeline {
        Timeline {
            name: name.into(),
            steps,
            looping,
            state: TimelineState::Idle,
            queue: VecDeque::new(),
            active: None,
            loop_count: 0,
        }
    }

    pub fn from_template(template: &TimelineTemplate) -> Timeline {
        Timeline::new(template.name.clone(), template.steps.clone(), template.looping)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TimelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimelineState::Running
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Name of the step currently armed, if any
    pub fn current_step(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|a| self.steps[a.index].name.as_str())
    }

    /// Seed the queue from `from_step` to the end and begin running.
    /// A step already in flight is cancelled first.
    pub fn start<S: VariableScope>(&mut self, scene: &mut S, from_step: usize) {
        self.cancel_active(scene);
        self.queue = (from_step..self.steps.len()).collect();
        self.loop_count = 0;
        self.state = TimelineState::Running;
        info!(target: "timeline", "[{}] started at step {}", self.name, from_step);
    }

    /// Cancel the in-flight step and go back to Idle
    pub fn stop<S: VariableScope>(&mut self, scene: &mut S) {
        self.cancel_active(scene);
        self.queue.clear();
        self.state = TimelineState::Idle;
        info!(target: "timeline", "[{}] stopped", self.name);
    }

    /// Re-seed the queue at step `n`. With `interrupt` the current wait
    /// is cancelled immediately; without it the in-flight step finishes
    /// and the jump takes effect at the next dequeue.
    pub fn go_to_step<S: VariableScope>(&mut self, scene: &mut S, n: usize, interrupt: bool) {
        self.queue = (n..self.steps.len()).collect();
        if interrupt {
            self.cancel_active(scene);
        }
        self.state = TimelineState::Running;
        debug!(target: "timeline", "[{}] jump to step {} (interrupt={})", self.name, n, interrupt);
    }

    /// Advance as far as `now` allows. Never blocks.
    pub fn tick<S: VariableScope>(&mut self, scene: &mut S, now: Instant) {
        if self.state != TimelineState::Running {
            return;
        }

        let mut budget = MAX_COMPLETIONS_PER_TICK;
        loop {
            if self.active.is_none() {
                let Some(index) = self.queue.pop_front() else {
                    if self.looping && !self.steps.is_empty() {
                        self.loop_count += 1;
                        self.queue = (0..self.steps.len()).collect();
                        debug!(target: "timeline", "[{}] loop {}", self.name, self.loop_count);
                        continue;
                    }
                    self.state = TimelineState::Idle;
                    info!(target: "timeline", "[{}] finished", self.name);
                    return;
                };
                self.active = Some(self.arm(index, scene, now));
            }

            let open = {
                let active = self.active.as_ref().unwrap();
                Self::gate_open(&active.wait, scene, now)
            };
            if !open {
                return;
            }

            let mut active = self.active.take().unwrap();
            if let WaitState::Event { token, .. } = &active.wait {
                scene.unsubscribe(*token);
            }

            self.run_actions(active.index, scene);

            if !self.step_done(&mut active, scene, now) {
                let gate = self.steps[active.index].gate.clone();
                active.wait = Self::make_wait(&gate, scene, now);
                self.active = Some(active);
            }

            budget -= 1;
            if budget == 0 {
                debug!(target: "timeline", "[{}] tick budget exhausted", self.name);
                return;
            }
        }
    }

    fn arm<S: VariableScope>(&self, index: usize, scene: &mut S, now: Instant) -> ActiveStep {
        let step = &self.steps[index];
        let repeat_deadline = match step.end {
            EndRule::Duration { seconds } => {
                Some(now + Duration::from_secs_f32(seconds.max(0.0)))
            }
            _ => None,
        };
        debug!(target: "timeline", "[{}] arming step '{}'", self.name, step.name);
        ActiveStep {
            index,
            wait: Self::make_wait(&step.gate, scene, now),
            iterations_done: 0,
            repeat_deadline,
        }
    }

    fn make_wait<S: VariableScope>(gate: &StartGate, scene: &mut S, now: Instant) -> WaitState {
        match gate {
            StartGate::Delay { seconds } => {
                WaitState::Deadline(now + Duration::from_secs_f32(seconds.max(0.0)))
            }
            StartGate::WaitUntil(set) => WaitState::Until(set.clone()),
            StartGate::WaitWhile(set) => WaitState::While(set.clone()),
            StartGate::WaitEvent { id } => {
                let fired = Arc::new(AtomicBool::new(false));
                let flag = fired.clone();
                let token = scene.subscribe(
                    *id,
                    Box::new(move |_| flag.store(true, Ordering::SeqCst)),
                );
                WaitState::Event { token, fired }
            }
        }
    }

    fn gate_open<S: VariableScope>(wait: &WaitState, scene: &S, now: Instant) -> bool {
        match wait {
            WaitState::Deadline(deadline) => now >= *deadline,
            WaitState::Until(set) => set.evaluate(scene),
            WaitState::While(set) => !set.evaluate(scene),
            WaitState::Event { fired, .. } => fired.load(Ordering::SeqCst),
        }
    }

    fn run_actions<S: VariableScope>(&self, index: usize, scene: &mut S) {
        let step = &self.steps[index];
        for action in &step.actions {
            match action {
                StepAction::Modify { id, op } => {
                    let mut trail = CausalTrail::from_originator(&self.name);
                    trail.push(&self.name, &format!("step '{}'", step.name));
                    if let Err(e) = scene.modify_traced(*id, op, &self.name, trail) {
                        warn!(target: "timeline",
                            "[{}] step '{}' modify on {} failed: {}",
                            self.name, step.name, id, e
                        );
                    }
                }
                StepAction::Trigger { id } => {
                    let mut trail = CausalTrail::from_originator(&self.name);
                    trail.push(&self.name, &format!("step '{}'", step.name));
                    if let Err(e) = scene.trigger_traced(*id, &self.name, trail) {
                        warn!(target: "timeline",
                            "[{}] step '{}' trigger on {} failed: {}",
                            self.name, step.name, id, e
                        );
                    }
                }
                StepAction::Trace { message } => {
                    info!(target: "timeline", "[{}/{}] {}", self.name, step.name, message);
                }
            }
        }
    }

    /// Evaluate the end rule after an actions pass. `false` means the
    /// step re-arms its gate and goes again.
    fn step_done<S: VariableScope>(&self, active: &mut ActiveStep, scene: &S, now: Instant) -> bool {
        match &self.steps[active.index].end {
            EndRule::None => true,
            EndRule::Duration { .. } => match active.repeat_deadline {
                Some(deadline) => now >= deadline,
                None => true,
            },
            EndRule::Condition(set) => set.evaluate(scene),
            EndRule::Iterations { count } => {
                active.iterations_done += 1;
                active.iterations_done >= *count
            }
        }
    }

    fn cancel_active<S: VariableScope>(&mut self, scene: &mut S) {
        if let Some(active) = self.active.take() {
            if let WaitState::Event { token, .. } = active.wait {
                scene.unsubscribe(token);
            }
            debug!(target: "timeline", "[{}] cancelled in-flight step", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SceneTemplate, VariableTemplate};
    use crate::ops::{Comparison, Operation};
    use crate::scene::Scene;
    use crate::timeline::step::ConditionClause;
    use crate::value::{Value, VarKind};

    fn scene() -> Scene {
        let mut t = SceneTemplate::new("test");
        t.variables
            .push(VariableTemplate::new(1, VarKind::Int).with_value(Value::Int(0)));
        t.variables.push(VariableTemplate::new(2, VarKind::Event));
        t.variables
            .push(VariableTemplate::new(3, VarKind::Bool).with_value(Value::Bool(false)));
        let mut scene = Scene::new("test");
        scene.build(&t).unwrap();
        scene
    }

    fn increment_step(name: &str, gate: StartGate) -> Step {
        Step::new(name, gate).with_actions(vec![StepAction::Modify {
            id: 1,
            op: Operation::Increment,
        }])
    }

    #[test]
    fn test_delay_gate_waits_for_deadline() {
        let mut scene = scene();
        let mut timeline = Timeline::new(
            "tl",
            vec![increment_step("a", StartGate::Delay { seconds: 1.0 })],
            false,
        );

        let t0 = Instant::now();
        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.int_value(1), Some(0));
        assert!(timeline.is_running());

        timeline.tick(&mut scene, t0 + Duration::from_secs(2));
        assert_eq!(scene.int_value(1), Some(1));
        assert!(!timeline.is_running());
    }

    #[test]
    fn test_zero_delay_steps_chain_in_one_tick() {
        let mut scene = scene();
        let steps = vec![
            increment_step("a", StartGate::Delay { seconds: 0.0 }),
            increment_step("b", StartGate::Delay { seconds: 0.0 }),
            increment_step("c", StartGate::Delay { seconds: 0.0 }),
        ];
        let mut timeline = Timeline::new("tl", steps, false);

        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, Instant::now());
        assert_eq!(scene.int_value(1), Some(3));
        assert!(!timeline.is_running());
    }

    #[test]
    fn test_event_gate_subscribes_and_releases() {
        let mut scene = scene();
        let mut timeline = Timeline::new(
            "tl",
            vec![increment_step("a", StartGate::WaitEvent { id: 2 })],
            false,
        );

        let t0 = Instant::now();
        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.subscriber_count(2), 1);
        assert_eq!(scene.int_value(1), Some(0));

        scene.trigger(2, "test").unwrap();
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.int_value(1), Some(1));
        // gate resolution released the registration
        assert_eq!(scene.subscriber_count(2), 0);
    }

    #[test]
    fn test_stop_releases_event_registration() {
        let mut scene = scene();
        let mut timeline = Timeline::new(
            "tl",
            vec![increment_step("a", StartGate::WaitEvent { id: 2 })],
            false,
        );

        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, Instant::now());
        assert_eq!(scene.subscriber_count(2), 1);

        timeline.stop(&mut scene);
        assert_eq!(scene.subscriber_count(2), 0);
        assert!(!timeline.is_running());
    }

    #[test]
    fn test_wait_until_gate() {
        let mut scene = scene();
        let gate = StartGate::WaitUntil(ConditionSet::all(vec![ConditionClause {
            id: 3,
            compare: Comparison::IsTrue,
        }]));
        let mut timeline = Timeline::new("tl", vec![increment_step("a", gate)], false);

        let t0 = Instant::now();
        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.int_value(1), Some(0));

        scene.modify(3, &Operation::ToTrue, "test").unwrap();
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.int_value(1), Some(1));
    }

    #[test]
    fn test_iterations_end_rule_repeats() {
        let mut scene = scene();
        let step = increment_step("a", StartGate::Delay { seconds: 0.0 })
            .with_end(EndRule::Iterations { count: 3 });
        let mut timeline = Timeline::new("tl", vec![step], false);

        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, Instant::now());
        assert_eq!(scene.int_value(1), Some(3));
        assert!(!timeline.is_running());
    }

    #[test]
    fn test_condition_end_rule_repeats_until_true() {
        let mut scene = scene();
        let step = increment_step("a", StartGate::Delay { seconds: 0.0 }).with_end(
            EndRule::Condition(ConditionSet::all(vec![ConditionClause {
                id: 1,
                compare: Comparison::SupEqual(Value::Int(5)),
            }])),
        );
        let mut timeline = Timeline::new("tl", vec![step], false);

        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, Instant::now());
        assert_eq!(scene.int_value(1), Some(5));
    }

    #[test]
    fn test_looping_is_budgeted_per_tick() {
        let mut scene = scene();
        let mut timeline = Timeline::new(
            "tl",
            vec![increment_step("a", StartGate::Delay { seconds: 0.0 })],
            true,
        );

        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, Instant::now());
        // still running, advanced exactly the per-tick budget
        assert!(timeline.is_running());
        assert_eq!(scene.int_value(1), Some(MAX_COMPLETIONS_PER_TICK as i32));
        assert!(timeline.loop_count() > 0);
    }

    #[test]
    fn test_go_to_step_with_interrupt() {
        let mut scene = scene();
        let steps = vec![
            increment_step("a", StartGate::WaitEvent { id: 2 }),
            increment_step("b", StartGate::Delay { seconds: 0.0 }),
            increment_step("c", StartGate::Delay { seconds: 0.0 }),
        ];
        let mut timeline = Timeline::new("tl", steps, false);

        let t0 = Instant::now();
        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.subscriber_count(2), 1);

        // jump past the blocked step; its registration must go away
        timeline.go_to_step(&mut scene, 2, true);
        assert_eq!(scene.subscriber_count(2), 0);
        timeline.tick(&mut scene, t0);
        assert_eq!(scene.int_value(1), Some(1));
        assert!(!timeline.is_running());
    }

    #[test]
    fn test_go_to_step_without_interrupt_finishes_current() {
        let mut scene = scene();
        let steps = vec![
            increment_step("a", StartGate::WaitEvent { id: 2 }),
            increment_step("b", StartGate::Delay { seconds: 0.0 }),
            increment_step("c", StartGate::Delay { seconds: 0.0 }),
        ];
        let mut timeline = Timeline::new("tl", steps, false);

        let t0 = Instant::now();
        timeline.start(&mut scene, 0);
        timeline.tick(&mut scene, t0);

        timeline.go_to_step(&mut scene, 2, false);
        // blocked step is still armed and still subscribed
        assert_eq!(scene.subscriber_count(2), 1);

        scene.trigger(2, "test").unwrap();
        timeline.tick(&mut scene, t0);
        // step a fired, then the jump target, skipping b
        assert_eq!(scene.int_value(1), Some(2));
        assert!(!timeline.is_running());
    }
}
