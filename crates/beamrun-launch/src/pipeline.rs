//! Per-SDK launch details: which option conventions a pipeline kind follows
//! and which commands start it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{LaunchError, Result},
    options::MapFormat,
    process::CommandSpec,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PipelineSpec {
    Python {
        py_file: String,
        #[serde(default = "default_interpreter")]
        py_interpreter: String,
        #[serde(default)]
        py_options: Vec<String>,
        /// Packages installed into a fresh virtualenv before launching.
        #[serde(default)]
        py_requirements: Option<Vec<String>>,
        #[serde(default)]
        py_system_site_packages: bool,
    },
    Java {
        jar: String,
        #[serde(default)]
        job_class: Option<String>,
    },
    Go {
        go_file: String,
    },
}

fn default_interpreter() -> String {
    "python3".to_string()
}

/// Inputs to [`PipelineSpec::command_plan`] that are only known once the
/// artifact has been resolved.
#[derive(Debug)]
pub struct PlanInputs<'a> {
    pub artifact: &'a Path,
    pub runner: &'a str,
    pub pipeline_args: &'a [String],
    pub artifact_downloaded: bool,
    pub venv_dir: Option<&'a Path>,
}

impl PipelineSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineSpec::Python { .. } => "python",
            PipelineSpec::Java { .. } => "java",
            PipelineSpec::Go { .. } => "go",
        }
    }

    pub fn artifact(&self) -> &str {
        match self {
            PipelineSpec::Python { py_file, .. } => py_file,
            PipelineSpec::Java { jar, .. } => jar,
            PipelineSpec::Go { go_file } => go_file,
        }
    }

    pub fn job_name_key(&self) -> &'static str {
        match self {
            PipelineSpec::Java { .. } => "jobName",
            PipelineSpec::Python { .. } | PipelineSpec::Go { .. } => "job_name",
        }
    }

    /// Python and Go SDKs expect snake_case flags on every runner.
    pub fn snake_case_options(&self) -> bool {
        !matches!(self, PipelineSpec::Java { .. })
    }

    pub fn supports_impersonation(&self) -> bool {
        !matches!(self, PipelineSpec::Go { .. })
    }

    pub fn stamps_version_label(&self) -> bool {
        !matches!(self, PipelineSpec::Java { .. })
    }

    pub fn map_format(&self) -> MapFormat {
        match self {
            PipelineSpec::Python { .. } => MapFormat::Repeated,
            PipelineSpec::Java { .. } | PipelineSpec::Go { .. } => MapFormat::Json,
        }
    }

    pub fn needs_venv(&self) -> bool {
        matches!(self, PipelineSpec::Python { py_requirements: Some(_), .. })
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifact().trim().is_empty() {
            return Err(LaunchError::Configuration(format!(
                "{} pipeline has no artifact path",
                self.kind()
            )));
        }
        if let PipelineSpec::Python {
            py_requirements: Some(requirements),
            py_system_site_packages,
            ..
        } = self
        {
            if requirements.is_empty() && !py_system_site_packages {
                return Err(LaunchError::Configuration(
                    "invalid method invocation: py_system_site_packages is false and \
                     py_requirements is empty, so no virtualenv is needed"
                        .into(),
                ));
            }
        }
        Ok(())
    }

    /// Commands to run, in order. Only the last one is the pipeline itself.
    pub fn command_plan(&self, inputs: &PlanInputs<'_>) -> Result<Vec<CommandSpec>> {
        self.validate()?;
        let runner_flag = format!("--runner={}", inputs.runner);
        let artifact = inputs.artifact.display().to_string();

        match self {
            PipelineSpec::Python {
                py_interpreter,
                py_options,
                py_requirements,
                py_system_site_packages,
                ..
            } => {
                let mut plan = Vec::new();
                let interpreter = match (py_requirements, inputs.venv_dir) {
                    (Some(requirements), Some(venv)) => {
                        let mut create = CommandSpec::new(py_interpreter.as_str()).args(["-m", "venv"]);
                        if *py_system_site_packages {
                            create = create.arg("--system-site-packages");
                        }
                        plan.push(create.arg(venv.display().to_string()));
                        if !requirements.is_empty() {
                            plan.push(
                                CommandSpec::new(venv.join("bin").join("pip").display().to_string())
                                    .arg("install")
                                    .args(requirements.iter().cloned()),
                            );
                        }
                        venv.join("bin").join("python").display().to_string()
                    }
                    (Some(_), None) => {
                        return Err(LaunchError::Configuration(
                            "python requirements need a virtualenv directory".into(),
                        ))
                    }
                    (None, _) => py_interpreter.clone(),
                };
                plan.push(
                    CommandSpec::new(interpreter)
                        .args(py_options.iter().cloned())
                        .arg(artifact)
                        .arg(runner_flag)
                        .args(inputs.pipeline_args.iter().cloned()),
                );
                Ok(plan)
            }
            PipelineSpec::Java { job_class, .. } => {
                let launch = match job_class {
                    Some(class) => CommandSpec::new("java").arg("-cp").arg(artifact).arg(class.as_str()),
                    None => CommandSpec::new("java").arg("-jar").arg(artifact),
                };
                Ok(vec![launch
                    .arg(runner_flag)
                    .args(inputs.pipeline_args.iter().cloned())])
            }
            PipelineSpec::Go { .. } => {
                let work_dir = inputs
                    .artifact
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."))
                    .to_path_buf();
                let file_name = inputs
                    .artifact
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        LaunchError::Configuration(format!("go_file {artifact} has no file name"))
                    })?;

                let mut plan = Vec::new();
                if inputs.artifact_downloaded {
                    plan.push(
                        CommandSpec::new("go")
                            .args(["mod", "init", "main"])
                            .current_dir(&work_dir),
                    );
                    plan.push(
                        CommandSpec::new("go")
                            .args(["mod", "tidy"])
                            .current_dir(&work_dir),
                    );
                }
                plan.push(
                    CommandSpec::new("go")
                        .arg("run")
                        .arg(file_name)
                        .arg(runner_flag)
                        .args(inputs.pipeline_args.iter().cloned())
                        .current_dir(&work_dir),
                );
                Ok(plan)
            }
        }
    }
}
