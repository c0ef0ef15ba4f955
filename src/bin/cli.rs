use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use scenevar::config::{SceneTemplate, TimelineTemplate, VariableTemplate};
use scenevar::ops::Operation;
use scenevar::runner::{self, SceneAction};
use scenevar::scene::{Scene, VariableScope};
use scenevar::sync::SyncedScene;
use scenevar::timeline::{StartGate, Step, StepAction, Timeline};
use scenevar::value::{Value, VarKind};
use scenevar::{ComplexVariable, DerivationRule};

#[derive(Parser)]
#[command(version, about = "Run a scene authority with an in-process observer replica")]
pub struct Cli {
    /// Scene template to load; a built-in demo scene when omitted
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Seconds to run before shutting down
    #[arg(short, long, default_value_t = 3.0)]
    duration: f32,

    /// Also log to scenevar.log in the working directory
    #[arg(long)]
    log_file: bool,
}

/// Counter scene: a bounded counter, a static offset, their sum as a
/// complex variable, and a looping timeline that bumps the counter.
fn demo_template() -> SceneTemplate {
    let mut template = SceneTemplate::new("demo");

    let mut counter = VariableTemplate::new(1, VarKind::Int).with_value(Value::Int(0));
    counter.max_int = Some(10);
    template.variables.push(counter);

    let mut offset = VariableTemplate::new(2, VarKind::Int).with_value(Value::Int(5));
    offset.is_static = true;
    template.variables.push(offset);

    template.variables.push(VariableTemplate::new(3, VarKind::Event));

    template.complex.push(ComplexVariable {
        id: 100,
        kind: VarKind::Int,
        rule: DerivationRule::Sum,
        dependencies: vec![1, 2],
    });

    template.timelines.push(TimelineTemplate {
        name: "pulse".into(),
        looping: true,
        steps: vec![
            Step::new("bump", StartGate::Delay { seconds: 0.2 }).with_actions(vec![
                StepAction::Modify {
                    id: 1,
                    op: Operation::Add(Value::Int(1)),
                },
            ]),
            Step::new("mark", StartGate::Delay { seconds: 0.2 }).with_actions(vec![
                StepAction::Trigger { id: 3 },
                StepAction::Trace {
                    message: "pulse complete".into(),
                },
            ]),
        ],
    });

    template
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _guard = if cli.log_file {
        let file_appender = tracing_appender::rolling::never(".", "scenevar.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        None
    };

    let template = match &cli.template {
        Some(path) => SceneTemplate::load(path)?,
        None => demo_template(),
    };
    info!("Running scene '{}' for {}s", template.name, cli.duration);

    let mut scene = Scene::new(template.name.clone());
    scene.build(&template)?;
    let mut authority = SyncedScene::new(scene, 1);

    // watch the derived variable on the authority side
    authority.subscribe(
        100,
        Box::new(|e| {
            info!(target: "events", "sum {} -> {} (by {})", e.former_value, e.new_value, e.originator);
        }),
    );

    let timelines: Vec<Timeline> = template.timelines.iter().map(Timeline::from_template).collect();
    let timeline_names: Vec<String> = timelines.iter().map(|t| t.name().to_string()).collect();

    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let authority_task = tokio::spawn(runner::run_scene(
        authority,
        timelines,
        action_rx,
        frame_tx,
        Some(shutdown_rx),
    ));

    let mut observer = SyncedScene::new(Scene::new("observer"), 2);
    observer.set_callback(Box::new(|op, key, _| {
        debug!(target: "sync", "observer applied {} on {}", op, key);
    }));
    let observer_task = tokio::spawn(runner::run_observer(observer, frame_rx));

    for name in timeline_names {
        action_tx.send(SceneAction::StartTimeline { name, from_step: 0 })?;
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f32(cli.duration.max(0.0))) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }
    shutdown_tx.send(true)?;

    authority_task.await?;
    let observer = observer_task.await?;

    info!("Observer final state:");
    for id in observer.scene().ids() {
        let var = observer.scene().var(id)?;
        info!("  {} ({}) = {}", id, var.kind, var.value);
    }

    Ok(())
}
