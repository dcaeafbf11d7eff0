use std::{path::PathBuf, sync::Arc, time::Duration};

use beamrun_launch::{
    config::DEFAULT_LOCATION,
    tracker::TrackerSettings,
    Coordinator, DataflowClient, Disposition, HttpArtifactFetcher, LaunchExecutor, LaunchLedger,
    LaunchSpec, RemoteJobClient, RemoteJobTracker, ServiceConfig, TokioProcessLauncher,
};
use clap::{Parser, Subcommand};
use tracing::warn;

#[derive(Parser)]
#[command(name = "beamrun", version, about = "Launch Beam pipelines and follow Dataflow jobs")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Launch the pipeline described by a JSON launch file
    Run {
        spec: PathBuf,
        /// Override the runner named in the launch file
        #[arg(long)]
        runner: Option<String>,
    },
    /// Cancel or drain a remote job by id
    Cancel {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = DEFAULT_LOCATION)]
        location: String,
        #[arg(long)]
        drain: bool,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Show recorded launches, newest first
    History {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    beamrun_util::init_tracing()?;
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Run { spec, runner } => {
            let mut spec = LaunchSpec::load(&spec)?;
            if let Some(runner) = runner {
                spec.runner = runner;
            }
            run(spec).await?;
        }
        Cmd::Cancel {
            job_id,
            project,
            location,
            drain,
            timeout_secs,
        } => {
            let service = ServiceConfig::from_env();
            let client = Arc::new(DataflowClient::new(&service)?);
            let project = project
                .or_else(|| client.default_project_id())
                .ok_or("no project given; pass --project or set BEAMRUN_PROJECT")?;
            let tracker = RemoteJobTracker::new(
                client,
                TrackerSettings {
                    poll_sleep: Duration::from_secs(10),
                    drain_pipeline: drain,
                    cancel_timeout: Duration::from_secs(timeout_secs),
                    wait_until_finished: None,
                    duplicate_wait_timeout: None,
                    completion_timeout: None,
                },
            );
            tracker.cancel(&job_id, &project, &location).await;
        }
        Cmd::History { json } => {
            let records = LaunchLedger::open_default().records();
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("no launches recorded");
            } else {
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}/{}",
                        record.job_name,
                        record.job_id.as_deref().unwrap_or("-"),
                        record.status,
                        record.project_id,
                        record.location
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run(spec: LaunchSpec) -> Result<(), Box<dyn std::error::Error>> {
    let service = ServiceConfig::from_env();
    let client: Arc<dyn RemoteJobClient> = Arc::new(DataflowClient::new(&service)?);
    let fetcher = Arc::new(HttpArtifactFetcher::new(&service)?);
    let executor = LaunchExecutor::new(Arc::new(TokioProcessLauncher), fetcher);
    let coordinator = Coordinator::new(spec, executor, client);
    let ledger = LaunchLedger::open_default();

    let mut execution = Box::pin(coordinator.execute(&ledger));
    tokio::select! {
        result = &mut execution => {
            let job_name = coordinator.current_job().map(|job| job.job_name().to_string());
            match result {
                Ok(outcome) => {
                    if let Some(job_name) = job_name.as_deref() {
                        if outcome.disposition == Disposition::Completed {
                            ledger.record_status(job_name, "succeeded");
                        }
                    }
                    println!("disposition={:?}", outcome.disposition);
                    if let Some(job_name) = outcome.job_name {
                        println!("job_name={job_name}");
                    }
                    println!("job_id={}", outcome.job_id.unwrap_or_default());
                }
                Err(err) => {
                    if let Some(job_name) = job_name.as_deref() {
                        ledger.record_status(job_name, "failed");
                    }
                    return Err(err.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cancelling the remote job if one was started");
            coordinator.on_kill().await;
            if let Some(job) = coordinator.current_job() {
                ledger.record_status(job.job_name(), "cancelled");
            }
            drop(execution);
            std::process::exit(130);
        }
    }
    Ok(())
}
