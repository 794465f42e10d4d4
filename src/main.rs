use clap::Parser;
use hive_pipeline::{
    App, PipelineConfig,
    core::{Component, max_thread_count},
    system::{
        Iter, SystemDesc, SystemId, SystemStatus,
        query::{Signature, Term},
        schedule::{OnLoad, OnUpdate, PostUpdate},
        timer::Timer,
    },
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::info;

#[derive(Parser)]
#[command(name = "hive-pipeline", about = "Runs a small frame pipeline demo")]
struct Args {
    /// Worker threads, overrides HIVE_THREADS
    #[arg(short, long)]
    threads: Option<usize>,

    /// Target frames per second, overrides HIVE_TARGET_FPS
    #[arg(short, long)]
    fps: Option<f32>,

    /// Frames to run before quitting
    #[arg(short = 'n', long, default_value_t = 120)]
    frames: u64,

    /// Record time spent in each system
    #[arg(long)]
    measure: bool,
}

struct Position;
impl Component for Position {}

struct Velocity;
impl Component for Velocity {}

struct Expired;
impl Component for Expired {}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hive_pipeline=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_env()?.with_system_time(args.measure);
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(fps) = args.fps {
        config = config.try_with_target_fps(fps)?;
    }

    if config.threads > max_thread_count() {
        tracing::warn!(
            threads = config.threads,
            available = max_thread_count(),
            "more workers than cores"
        );
    }

    let mut builder = App::new();
    builder.config(config);

    let position = builder.register::<Position>();
    let velocity = builder.register::<Velocity>();
    let expired = builder.register::<Expired>();

    for _ in 0..256 {
        builder.world_mut().spawn(&[position, velocity]);
    }

    builder.add_system(
        SystemDesc::new("spawn_wave")
            .phase(OnLoad)
            .signature(Signature::new().with(Term::write(position).empty())),
        move |it: &mut Iter| {
            for _ in 0..8 {
                it.spawn(&[position, velocity]);
            }
        },
    );

    let moved = Arc::new(AtomicUsize::new(0));
    builder.add_system(
        SystemDesc::new("integrate")
            .phase(OnUpdate)
            .signature(Signature::new().write(position).read(velocity)),
        {
            let moved = moved.clone();
            move |it: &mut Iter| {
                moved.fetch_add(it.count(), Ordering::Relaxed);
            }
        },
    );

    let expire = builder.add_system(
        SystemDesc::new("expire")
            .phase(OnUpdate)
            .signature(
                Signature::new()
                    .read(position)
                    .with(Term::write(expired).empty()),
            ),
        move |it: &mut Iter| {
            let entities = it.entities();
            for entity in entities.iter().step_by(16) {
                it.add(*entity, expired);
            }
        },
    );

    builder.add_system(
        SystemDesc::new("cleanup")
            .phase(PostUpdate)
            .signature(Signature::new().read(expired)),
        |it: &mut Iter| {
            for entity in it.entities() {
                it.despawn(*entity);
            }
        },
    );

    let mut app = builder.build();
    app.set_status_action(expire, |id: SystemId, status: SystemStatus| {
        info!(system = id.index(), ?status, "status changed");
    });
    app.set_tick_source(expire, Arc::new(Timer::new(0.5)));

    while app.progress(0.0) {
        if app.timer().frame_count() >= args.frames {
            app.quit();
        }
    }

    let stats = app.stats();
    info!(
        frames = stats.frame_count_total,
        builds = stats.pipeline_build_count_total,
        merges = stats.merge_count_total,
        moved = moved.load(Ordering::Relaxed),
        entities = app.world().archetypes().entity_count(),
        system_time = ?stats.system_time_total,
        "done"
    );

    Ok(())
}
