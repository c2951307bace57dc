//! Ordered build plans.
//!
//! A plan is a pure function of the validated descriptor, the selected base
//! image and the precompile flag, so identical inputs always give the same
//! steps in the same order.

use kiln_common::constants::{RUNTIME_PACKAGE, SOURCE_DIR, TOOL_VERSION};
use kiln_common::types::{Toolkit, Version};
use kiln_config::ValidatedConfig;
use kiln_image::BaseImageCandidate;

/// One step of a build plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    /// Start from a base image.
    Base {
        /// Image reference.
        image: String,
    },
    /// Set environment defaults.
    Environment {
        /// Variables in the order they are set.
        vars: Vec<(String, String)>,
    },
    /// Install system packages with apt.
    SystemPackages {
        /// Package names.
        packages: Vec<String>,
    },
    /// Install the Python runtime with pyenv.
    InstallPython {
        /// Requested runtime version.
        version: Version,
    },
    /// Wire the CUDA toolkit of the base image into the environment.
    Toolkit {
        /// Toolkit provided by the base image.
        toolkit: Toolkit,
    },
    /// Install the prediction server library the image starts with.
    InstallRuntime {
        /// Pinned pip specifier.
        package: String,
    },
    /// Install Python dependencies from a requirements file.
    PythonRequirements {
        /// Requirements path relative to the project root.
        path: String,
    },
    /// Install Python packages with pip.
    PythonPackages {
        /// Package specifiers.
        packages: Vec<String>,
    },
    /// Run a user-supplied shell command.
    Run {
        /// Shell command.
        command: String,
    },
    /// Copy the project into the image.
    CopyProject {
        /// Destination directory.
        dest: String,
    },
    /// Byte-compile the project sources. Best effort.
    Precompile {
        /// Directory to compile.
        dir: String,
    },
    /// Record the entry-point reference in the image environment.
    EntryPoint {
        /// `<module-path>:<TypeName>` reference.
        reference: String,
    },
    /// Start the prediction server.
    Serve,
}

/// Ordered steps producing one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    steps: Vec<BuildStep>,
}

impl BuildPlan {
    /// Assembles the plan for a validated descriptor and base image.
    ///
    /// Runtime installation and toolkit wiring are skipped when the base is
    /// a maintained image, which already ships both.
    #[must_use]
    pub fn assemble(
        config: &ValidatedConfig,
        base: &BaseImageCandidate,
        precompile: bool,
    ) -> Self {
        let build = &config.config().build;
        let mut steps = vec![
            BuildStep::Base {
                image: base.image().to_string(),
            },
            BuildStep::Environment {
                vars: vec![
                    ("DEBIAN_FRONTEND".into(), "noninteractive".into()),
                    ("PYTHONUNBUFFERED".into(), "1".into()),
                    (
                        "LD_LIBRARY_PATH".into(),
                        "$LD_LIBRARY_PATH:/usr/lib/x86_64-linux-gnu".into(),
                    ),
                ],
            },
        ];

        if !build.system_packages.is_empty() {
            steps.push(BuildStep::SystemPackages {
                packages: build.system_packages.clone(),
            });
        }

        if let BaseImageCandidate::FromScratch {
            python, toolkit, ..
        } = base
        {
            steps.push(BuildStep::InstallPython {
                version: python.clone(),
            });
            if let Some(toolkit) = toolkit {
                steps.push(BuildStep::Toolkit {
                    toolkit: toolkit.clone(),
                });
            }
        }

        steps.push(BuildStep::InstallRuntime {
            package: format!("{RUNTIME_PACKAGE}=={TOOL_VERSION}"),
        });

        if let Some(path) = &build.python_requirements {
            steps.push(BuildStep::PythonRequirements { path: path.clone() });
        }
        if !build.python_packages.is_empty() {
            steps.push(BuildStep::PythonPackages {
                packages: build.python_packages.clone(),
            });
        }
        steps.extend(build.run.iter().map(|command| BuildStep::Run {
            command: command.clone(),
        }));

        steps.push(BuildStep::CopyProject {
            dest: SOURCE_DIR.to_string(),
        });
        if precompile {
            steps.push(BuildStep::Precompile {
                dir: SOURCE_DIR.to_string(),
            });
        }
        steps.push(BuildStep::EntryPoint {
            reference: config.entry_point().to_string(),
        });
        steps.push(BuildStep::Serve);

        tracing::debug!(
            steps = steps.len(),
            maintained = base.is_maintained(),
            precompile,
            "build plan assembled"
        );
        Self { steps }
    }

    /// The steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    /// Image the plan starts from.
    #[must_use]
    pub fn base_image(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| match s {
            BuildStep::Base { image } => Some(image.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use kiln_config::{parse_descriptor, validate};
    use kiln_image::resolver::from_scratch;

    use super::*;

    fn config(yaml: &str) -> ValidatedConfig {
        validate(&parse_descriptor(yaml).expect("descriptor")).expect("valid")
    }

    fn maintained() -> BaseImageCandidate {
        BaseImageCandidate::Maintained {
            image: "base:py3.11".into(),
            python: Version::parse("3.11").expect("version"),
            toolkit: None,
            last_layer: None,
        }
    }

    fn has_step(plan: &BuildPlan, pred: impl Fn(&BuildStep) -> bool) -> bool {
        plan.steps().iter().any(pred)
    }

    #[test]
    fn maintained_base_skips_runtime_install() {
        let cfg = config("build:\n  python_version: \"3.11\"\npredict: predict.py:Predictor\n");
        let plan = BuildPlan::assemble(&cfg, &maintained(), false);
        assert_eq!(plan.base_image(), Some("base:py3.11"));
        assert!(!has_step(&plan, |s| matches!(s, BuildStep::InstallPython { .. })));
        assert!(!has_step(&plan, |s| matches!(s, BuildStep::Toolkit { .. })));
    }

    #[test]
    fn scratch_gpu_base_installs_runtime_and_toolkit() {
        let cfg = config("build:\n  python_version: \"3.8\"\n  gpu: true\npredict: predict.py:Predictor\n");
        let toolkit = Toolkit {
            cuda: Version::parse("11.8").expect("version"),
            cudnn: Version::parse("8").expect("version"),
        };
        let base = from_scratch(cfg.python_version(), Some(toolkit));
        let plan = BuildPlan::assemble(&cfg, &base, false);
        assert!(has_step(&plan, |s| matches!(s, BuildStep::InstallPython { .. })));
        assert!(has_step(&plan, |s| matches!(s, BuildStep::Toolkit { .. })));
    }

    #[test]
    fn steps_follow_fixed_order() {
        let cfg = config(
            "build:\n  python_version: \"3.11\"\n  system_packages: [ffmpeg]\n  python_packages: [torch==2.1.0]\n  run: [\"echo hi\"]\npredict: predict.py:Predictor\n",
        );
        let plan = BuildPlan::assemble(&cfg, &from_scratch(cfg.python_version(), None), true);
        let kinds: Vec<&str> = plan
            .steps()
            .iter()
            .map(|s| match s {
                BuildStep::Base { .. } => "base",
                BuildStep::Environment { .. } => "env",
                BuildStep::SystemPackages { .. } => "apt",
                BuildStep::InstallPython { .. } => "python",
                BuildStep::Toolkit { .. } => "toolkit",
                BuildStep::InstallRuntime { .. } => "runtime",
                BuildStep::PythonRequirements { .. } => "requirements",
                BuildStep::PythonPackages { .. } => "pip",
                BuildStep::Run { .. } => "run",
                BuildStep::CopyProject { .. } => "copy",
                BuildStep::Precompile { .. } => "precompile",
                BuildStep::EntryPoint { .. } => "entrypoint",
                BuildStep::Serve => "serve",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "base",
                "env",
                "apt",
                "python",
                "runtime",
                "pip",
                "run",
                "copy",
                "precompile",
                "entrypoint",
                "serve"
            ]
        );
    }

    #[test]
    fn runtime_library_is_installed_for_every_base() {
        let cfg = config("predict: predict.py:Predictor\n");
        let expected = BuildStep::InstallRuntime {
            package: format!("kiln=={TOOL_VERSION}"),
        };
        for base in [maintained(), from_scratch(cfg.python_version(), None)] {
            let plan = BuildPlan::assemble(&cfg, &base, false);
            let runtime = plan.steps().iter().position(|s| *s == expected);
            let serve = plan.steps().iter().position(|s| *s == BuildStep::Serve);
            assert!(runtime.expect("runtime step") < serve.expect("serve step"));
        }
    }

    #[test]
    fn precompile_is_opt_in() {
        let cfg = config("predict: predict.py:Predictor\n");
        let plan = BuildPlan::assemble(&cfg, &maintained(), false);
        assert!(!has_step(&plan, |s| matches!(s, BuildStep::Precompile { .. })));
    }

    #[test]
    fn plan_is_deterministic() {
        let cfg = config("build:\n  system_packages: [git, curl]\npredict: predict.py:Predictor\n");
        let a = BuildPlan::assemble(&cfg, &maintained(), true);
        let b = BuildPlan::assemble(&cfg, &maintained(), true);
        assert_eq!(a, b);
    }
}
