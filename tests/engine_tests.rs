//! End-to-end tests across the store, complex variables, timelines and
//! the replication layer, without the async runner in the loop.

use std::time::{Duration, Instant};

use scenevar::config::{SceneTemplate, VariableTemplate};
use scenevar::ops::{Comparison, Operation};
use scenevar::scene::Scene;
use scenevar::sync::{SyncRole, SyncedScene};
use scenevar::timeline::{ConditionClause, ConditionSet, EndRule, StartGate, Step, StepAction, Timeline};
use scenevar::value::{Value, VarKind};
use scenevar::{ComplexVariable, DerivationRule, VarError};

fn template() -> SceneTemplate {
    let mut t = SceneTemplate::new("arena");

    let mut health = VariableTemplate::new(1, VarKind::Int).with_value(Value::Int(80));
    health.min_int = Some(0);
    health.max_int = Some(100);
    t.variables.push(health);

    t.variables
        .push(VariableTemplate::new(2, VarKind::Int).with_value(Value::Int(20)));
    t.variables
        .push(VariableTemplate::new(3, VarKind::Bool).with_value(Value::Bool(false)));
    t.variables.push(VariableTemplate::new(4, VarKind::Event));

    t.complex.push(ComplexVariable {
        id: 100,
        kind: VarKind::Int,
        rule: DerivationRule::Sum,
        dependencies: vec![1, 2],
    });

    t
}

fn authority() -> SyncedScene {
    let mut scene = Scene::new("arena");
    scene.build(&template()).unwrap();
    SyncedScene::new(scene, 1)
}

#[test]
fn test_derived_values_replicate_without_definitions() {
    let mut auth = authority();
    let mut obs = SyncedScene::new(Scene::new("observer"), 2);
    obs.apply_snapshot(&auth.encode_snapshot().unwrap()).unwrap();
    assert_eq!(obs.scene().int_value(100), Some(100));

    // the observer never sees the Sum definition, only link values
    auth.modify(1, &Operation::Subtract(Value::Int(30)), "hit").unwrap();
    let delta = auth.take_delta().unwrap().unwrap();
    obs.apply_delta(&delta).unwrap();

    assert_eq!(obs.scene().int_value(1), Some(50));
    assert_eq!(obs.scene().int_value(100), Some(70));
}

#[test]
fn test_observer_is_a_mirror_not_a_peer() {
    let mut auth = authority();
    let mut obs = SyncedScene::new(Scene::new("observer"), 2);
    obs.apply_snapshot(&auth.encode_snapshot().unwrap()).unwrap();

    assert_eq!(obs.role(), SyncRole::ReadOnly);
    assert_eq!(auth.role(), SyncRole::Writable);
    assert_eq!(
        obs.modify(1, &Operation::Increment, "obs").unwrap_err(),
        VarError::NotAuthorized
    );
    assert_eq!(obs.trigger(4, "obs").unwrap_err(), VarError::NotAuthorized);
}

#[test]
fn test_timeline_mutations_flow_into_the_change_log() {
    let mut auth = authority();

    let steps = vec![Step::new("drain", StartGate::Delay { seconds: 0.0 })
        .with_actions(vec![StepAction::Modify {
            id: 1,
            op: Operation::Subtract(Value::Int(10)),
        }])
        .with_end(EndRule::Condition(ConditionSet::all(vec![ConditionClause {
            id: 1,
            compare: Comparison::InfEqual(Value::Int(50)),
        }])))];
    let mut timeline = Timeline::new("drain", steps, false);

    timeline.start(&mut auth, 0);
    timeline.tick(&mut auth, Instant::now());
    assert_eq!(auth.scene().int_value(1), Some(50));
    assert!(!timeline.is_running());

    // the collapsed flush carries final values for base and link
    let mut obs = SyncedScene::new(Scene::new("observer"), 2);
    let delta = auth.take_delta().unwrap().unwrap();
    obs.apply_delta(&delta).unwrap();
    assert_eq!(obs.scene().int_value(1), Some(50));
    assert_eq!(obs.scene().int_value(100), Some(70));
}

#[test]
fn test_event_gate_across_replicated_scene() {
    let mut auth = authority();

    let steps = vec![Step::new("on-signal", StartGate::WaitEvent { id: 4 }).with_actions(vec![
        StepAction::Modify {
            id: 3,
            op: Operation::ToTrue,
        },
    ])];
    let mut timeline = Timeline::new("signal", steps, false);

    let t0 = Instant::now();
    timeline.start(&mut auth, 0);
    timeline.tick(&mut auth, t0);
    assert_eq!(auth.scene().bool_value(3), Some(false));

    auth.trigger(4, "door").unwrap();
    timeline.tick(&mut auth, t0 + Duration::from_millis(1));
    assert_eq!(auth.scene().bool_value(3), Some(true));
    assert!(!timeline.is_running());
}

#[test]
fn test_bounds_hold_under_repeated_timeline_pressure() {
    let mut auth = authority();
    let steps = vec![Step::new("pump", StartGate::Delay { seconds: 0.0 })
        .with_actions(vec![StepAction::Modify {
            id: 1,
            op: Operation::Add(Value::Int(50)),
        }])
        .with_end(EndRule::Iterations { count: 5 })];
    let mut timeline = Timeline::new("pump", steps, false);

    timeline.start(&mut auth, 0);
    timeline.tick(&mut auth, Instant::now());

    // clamped at max from the first iteration on
    assert_eq!(auth.scene().int_value(1), Some(100));
    assert!(auth.scene().compare(1, &Comparison::IsMax).unwrap());
}

#[test]
fn test_scene_rebuild_is_a_clean_reentry() {
    let mut scene = Scene::new("arena");
    let t = template();
    scene.build(&t).unwrap();
    scene.modify(1, &Operation::ToNull, "test").unwrap();
    assert_eq!(scene.int_value(100), Some(20));

    scene.rebuild(&t).unwrap();
    assert_eq!(scene.int_value(1), Some(80));
    assert_eq!(scene.int_value(100), Some(100));
}
