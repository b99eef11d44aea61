use adaptive_engine::{
    services::{
        simulation::{LearnerResponder, Persona, PersonaSimulator, ReplaySource},
        SessionSnapshot, SimulationResults, SnapshotStore,
    },
    Config, InMemoryCatalog, SimulationHarness,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let json = std::env::var("ENGINE_LOG_JSON")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    let sim = config.simulation.clone();

    info!(
        module = %sim.module,
        steps = sim.steps_per_learner,
        scope = ?config.policy.scope,
        "Starting adaptive-engine simulation"
    );

    let catalog = Arc::new(InMemoryCatalog::module(&sim.module)?);
    let mut harness = SimulationHarness::new(&config, catalog)?;

    let snapshots = sim
        .snapshot_path
        .as_ref()
        .map(|path| SnapshotStore::new(path, sim.allow_reset_on_corrupt));
    if let Some(snapshots) = &snapshots {
        if let Some(snapshot) = snapshots
            .load()
            .await
            .context("Failed to load session snapshot")?
        {
            let restored = snapshot.apply(harness.store())?;
            harness = harness
                .with_policies(restored.policies)
                .with_progress(restored.progress);
        }
    }
    let harness = Arc::new(harness.with_traits(
        Persona::builtin()
            .into_iter()
            .map(|persona| (persona.learner_id, persona.traits)),
    ));

    let learners: Vec<(String, Box<dyn LearnerResponder>)> = match &sim.replay_path {
        Some(path) => {
            let transcript = ReplaySource::from_path(path)
                .await
                .with_context(|| format!("Failed to read transcript {}", path.display()))?;
            transcript
                .learner_ids()
                .into_iter()
                .map(|id| {
                    let source = transcript.for_learner(&id);
                    (id, Box::new(source) as Box<dyn LearnerResponder>)
                })
                .collect()
        }
        None => Persona::builtin()
            .into_iter()
            .enumerate()
            .map(|(i, persona)| {
                let seed = sim.seed.map(|s| s.wrapping_add(i as u64));
                let id = persona.learner_id.clone();
                let simulator =
                    PersonaSimulator::new(persona, sim.max_attempts, sim.trait_sensitivity, seed);
                (id, Box::new(simulator) as Box<dyn LearnerResponder>)
            })
            .collect(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, finishing current steps");
            let _ = shutdown_tx.send(true);
        }
    });

    let run = harness.run_all(learners, shutdown_rx).await;
    for failure in &run.failures {
        warn!(
            learner_id = %failure.learner_id,
            error = %failure.error,
            steps = failure.partial.as_ref().map_or(0, |t| t.steps.len()),
            "Learner failed, keeping partial state"
        );
    }

    if let Some(snapshots) = &snapshots {
        let snapshot = SessionSnapshot::capture(harness.store(), run.resumable());
        snapshots
            .save(&snapshot)
            .await
            .context("Failed to save session snapshot")?;
    }

    let failed = run.failures.len();
    let results = SimulationResults::new(run.trajectories).with_failures(&run.failures);
    for learner in &results.report.learners {
        info!(
            learner_id = %learner.learner_id,
            steps = learner.steps,
            rejected = learner.rejected,
            total_reward = learner.total_reward,
            accuracy = learner.accuracy,
            final_mode = %learner.final_mode,
            "Learner summary"
        );
    }
    results
        .write(&sim.output_path)
        .await
        .context("Failed to write simulation results")?;

    info!(
        learners = results.report.learners.len(),
        failed = failed,
        mean_total_reward = results.report.mean_total_reward,
        "Simulation complete"
    );
    if failed > 0 {
        anyhow::bail!("{} learner(s) failed; see {}", failed, sim.output_path.display());
    }
    Ok(())
}
