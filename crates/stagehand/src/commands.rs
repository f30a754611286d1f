//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use stageconf::{ConfigSources, StageConfig};
use stageproto::{LoopbackConfig, LoopbackTransport, SessionEvent};
use stagehand::{
    DataSource, DuplicatePolicy, EngineContext, HostLifecycle, SessionController, SessionOptions,
    SessionState, SimConfig, SimulatedEngine,
};
use tokio::sync::mpsc;
use tracing::info;

pub struct PlayArgs {
    pub uri: String,
    pub seconds: u64,
    pub mix: bool,
    pub looping: bool,
    pub speed: f64,
    pub duration: u64,
}

fn transport(config: &StageConfig, sim: SimConfig) -> Arc<LoopbackTransport> {
    let engine = SimulatedEngine::new(sim);
    LoopbackTransport::new(LoopbackConfig::from_config("sim", &config.channel), engine)
}

fn summary(state: &SessionState) -> String {
    let mut line = format!(
        "position={:.3}s/{:.3}s playing={} buffering={} completed={}",
        state.position.as_secs_f64(),
        state.duration.as_secs_f64(),
        state.is_playing,
        state.is_buffering,
        state.is_completed,
    );
    if let Some(error) = &state.error_description {
        line.push_str(&format!(" error={:?}", error));
    }
    line
}

pub async fn play(config: &StageConfig, args: PlayArgs) -> Result<()> {
    let transport = transport(
        config,
        SimConfig {
            duration: Duration::from_secs(args.duration),
            ..SimConfig::default()
        },
    );

    let mut options =
        SessionOptions::playback(DataSource::network(&args.uri)).with_config(&config.controller);
    if args.mix {
        options = options.with_mixing(true);
    }

    let controller = SessionController::new(transport.clone(), EngineContext::new(), options);
    let host = HostLifecycle::new();
    controller.observe_lifecycle(&host);

    let handle = controller
        .create()
        .await
        .with_context(|| format!("Failed to create session for {}", args.uri))?;
    let state = controller.value();
    println!(
        "session {} ready: {}x{} aspect={:.3} duration={:.3}s",
        handle,
        state.size.width,
        state.size.height,
        state.aspect_ratio(),
        state.duration.as_secs_f64()
    );

    controller.set_looping(args.looping).await?;
    controller
        .set_playback_speed(args.speed)
        .await
        .context("Invalid playback speed")?;
    controller.play().await.context("Failed to start playback")?;

    let mut updates = controller.subscribe();
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            state = updates.changed() => match state {
                Some(state) => println!("{}", summary(&state)),
                None => break,
            },
        }
    }

    controller.dispose().await.context("Failed to dispose session")?;
    transport.shutdown().await;
    info!("Played {} for {}s", args.uri, args.seconds);
    Ok(())
}

pub async fn scan(config: &StageConfig, codes: Vec<String>, allow_duplicates: bool) -> Result<()> {
    let transport = transport(config, SimConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut options = SessionOptions::capture(DataSource::device())
        .with_config(&config.controller)
        .on_detection(move |detection| {
            let _ = tx.send(detection.clone());
        });
    if allow_duplicates {
        options = options.with_duplicate_policy(DuplicatePolicy::Forward);
    }

    let controller = SessionController::new(transport.clone(), EngineContext::new(), options);
    let handle = controller
        .create()
        .await
        .context("Failed to start capture session")?;
    println!("capture session {} ready", handle);

    for code in &codes {
        let record = SessionEvent::Detection {
            payload: code.clone(),
            kind: "qr".to_string(),
            quality: 100,
        }
        .to_record();
        transport.events().emit(handle, record);
    }

    // Let the listener drain before the session goes away
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.dispose().await.context("Failed to dispose session")?;
    drop(controller);

    let mut forwarded = 0;
    while let Some(detection) = rx.recv().await {
        forwarded += 1;
        println!("{} {} (quality {})", detection.kind, detection.payload, detection.quality);
    }
    println!("{} of {} detections forwarded", forwarded, codes.len());

    transport.shutdown().await;
    Ok(())
}

pub fn config(config: &StageConfig, sources: &ConfigSources, show_sources: bool) {
    print!("{}", config.to_toml());
    if show_sources {
        println!();
        for file in &sources.files {
            println!("# loaded {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env {}", var);
        }
    }
}
