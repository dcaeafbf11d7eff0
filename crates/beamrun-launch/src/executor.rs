use std::sync::Arc;

use tracing::info;

use crate::{
    artifacts::{ArtifactFetcher, ArtifactSource, ScopedArtifact},
    error::{LaunchError, Result},
    options::PipelineOptions,
    pipeline::{PipelineSpec, PlanInputs},
    process::ProcessLauncher,
};

/// Resolves the pipeline artifact and runs the pipeline's commands.
#[derive(Clone)]
pub struct LaunchExecutor {
    launcher: Arc<dyn ProcessLauncher>,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl LaunchExecutor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self { launcher, fetcher }
    }

    /// Runs `pipeline` on `runner` to completion. Every output line of every
    /// step goes to `on_line`. Temporary artifact and virtualenv directories
    /// are removed before this returns, whatever the outcome.
    pub async fn launch(
        &self,
        pipeline: &PipelineSpec,
        runner: &str,
        options: &PipelineOptions,
        envs: &[(String, String)],
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<()> {
        pipeline.validate()?;
        let source = ArtifactSource::parse(pipeline.artifact());
        let artifact = ScopedArtifact::resolve(&source, self.fetcher.as_ref()).await?;
        let venv = if pipeline.needs_venv() {
            Some(tempfile::Builder::new().prefix("beamrun-venv-").tempdir()?)
        } else {
            None
        };

        let pipeline_args = options.to_args(pipeline.map_format());
        let plan = pipeline.command_plan(&PlanInputs {
            artifact: artifact.path(),
            runner,
            pipeline_args: &pipeline_args,
            artifact_downloaded: artifact.downloaded(),
            venv_dir: venv.as_ref().map(|dir| dir.path()),
        })?;

        info!(
            "launching {} pipeline {} on {runner} ({} step(s))",
            pipeline.kind(),
            artifact.path().display(),
            plan.len()
        );
        for mut command in plan {
            command.envs.extend(envs.iter().cloned());
            let outcome = self.launcher.run(&command, on_line).await?;
            if !outcome.success() {
                return Err(LaunchError::ProcessFailed {
                    program: command.program,
                    code: outcome.exit_code.unwrap_or(-1),
                    recent_output: outcome.recent_output,
                });
            }
        }
        Ok(())
    }
}
