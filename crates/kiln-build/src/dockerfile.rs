//! Renders a [`BuildPlan`] as a Dockerfile.

use std::fmt::Write as _;

use kiln_common::constants::PREDICT_ENV;

use crate::plan::{BuildPlan, BuildStep};

/// Path of the generated Dockerfile inside the build context.
pub const DOCKERFILE_PATH: &str = ".kiln/Dockerfile";

/// Packages pyenv needs to compile a Python runtime.
const PYENV_PREREQUISITES: &[&str] = &[
    "make",
    "build-essential",
    "libssl-dev",
    "zlib1g-dev",
    "libbz2-dev",
    "libreadline-dev",
    "libsqlite3-dev",
    "wget",
    "curl",
    "llvm",
    "libncurses5-dev",
    "libncursesw5-dev",
    "xz-utils",
    "tk-dev",
    "libffi-dev",
    "liblzma-dev",
    "git",
    "ca-certificates",
];

/// Command line that starts the prediction server.
const SERVE_COMMAND: &str = r#"CMD ["python", "-m", "kiln.server.http"]"#;

/// Renders the plan. Output is a pure function of the plan.
#[must_use]
pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::new();
    for step in plan.steps() {
        render_step(&mut out, step);
    }
    out
}

fn render_step(out: &mut String, step: &BuildStep) {
    match step {
        BuildStep::Base { image } => {
            let _ = writeln!(out, "FROM {image}");
        }
        BuildStep::Environment { vars } => {
            for (key, value) in vars {
                let _ = writeln!(out, "ENV {key}={value}");
            }
        }
        BuildStep::SystemPackages { packages } => {
            out.push_str("# --> Installing system packages\n");
            let _ = writeln!(
                out,
                "RUN apt-get update -qq && apt-get install -qqy --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
                packages.join(" ")
            );
        }
        BuildStep::InstallPython { version } => {
            out.push_str("# --> Installing Python prerequisites\n");
            out.push_str("ENV PATH=\"/root/.pyenv/shims:/root/.pyenv/bin:$PATH\"\n");
            out.push_str("RUN apt-get update -qq && apt-get install -qqy --no-install-recommends \\\n");
            for package in PYENV_PREREQUISITES {
                let _ = writeln!(out, "\t{package} \\");
            }
            out.push_str("\t&& rm -rf /var/lib/apt/lists/*\n");
            let _ = writeln!(out, "# --> Installing Python {version}");
            let _ = writeln!(
                out,
                "RUN curl -fsSL https://pyenv.run | bash && \\\n\
                 \tgit clone https://github.com/momo-lab/pyenv-install-latest.git \"$(pyenv root)\"/plugins/pyenv-install-latest && \\\n\
                 \tpyenv install-latest \"{version}\" && \\\n\
                 \tpyenv global $(pyenv install-latest --print \"{version}\")"
            );
        }
        BuildStep::Toolkit { toolkit } => {
            let _ = writeln!(out, "# --> Using {toolkit}");
            out.push_str("ENV NVIDIA_VISIBLE_DEVICES=all\n");
            out.push_str("ENV NVIDIA_DRIVER_CAPABILITIES=compute,utility\n");
            out.push_str("ENV PATH=/usr/local/cuda/bin:$PATH\n");
            out.push_str("ENV LD_LIBRARY_PATH=/usr/local/cuda/lib64:$LD_LIBRARY_PATH\n");
        }
        BuildStep::InstallRuntime { package } => {
            out.push_str("# --> Installing prediction server\n");
            let _ = writeln!(out, "RUN pip install --no-cache-dir {package}");
        }
        BuildStep::PythonRequirements { path } => {
            out.push_str("# --> Installing Python requirements\n");
            let _ = writeln!(out, "COPY {path} /tmp/requirements.txt");
            out.push_str(
                "RUN pip install --no-cache-dir -r /tmp/requirements.txt && rm /tmp/requirements.txt\n",
            );
        }
        BuildStep::PythonPackages { packages } => {
            out.push_str("# --> Installing Python packages\n");
            let _ = writeln!(out, "RUN pip install --no-cache-dir {}", packages.join(" "));
        }
        BuildStep::Run { command } => {
            let _ = writeln!(out, "RUN {command}");
        }
        BuildStep::CopyProject { dest } => {
            out.push_str("# --> Copying code\n");
            let _ = writeln!(out, "WORKDIR {dest}");
            let _ = writeln!(out, "COPY . {dest}");
        }
        BuildStep::Precompile { dir } => {
            out.push_str("# --> Precompiling\n");
            let _ = writeln!(out, "RUN python -m compileall -q {dir} || true");
        }
        BuildStep::EntryPoint { reference } => {
            let _ = writeln!(out, "ENV {PREDICT_ENV}={reference}");
        }
        BuildStep::Serve => {
            out.push_str(SERVE_COMMAND);
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use kiln_common::constants::TOOL_VERSION;
    use kiln_common::types::{Toolkit, Version};
    use kiln_config::{parse_descriptor, validate};
    use kiln_image::BaseImageCandidate;
    use kiln_image::resolver::from_scratch;

    use super::*;

    fn plan(yaml: &str, base: Option<BaseImageCandidate>, precompile: bool) -> BuildPlan {
        let cfg = validate(&parse_descriptor(yaml).expect("descriptor")).expect("valid");
        let base = base.unwrap_or_else(|| from_scratch(cfg.python_version(), None));
        BuildPlan::assemble(&cfg, &base, precompile)
    }

    #[test]
    fn render_minimal_maintained() {
        let base = BaseImageCandidate::Maintained {
            image: "base:py3.11".into(),
            python: Version::parse("3.11").expect("version"),
            toolkit: None,
            last_layer: None,
        };
        let rendered = render(&plan("predict: predict.py:Predictor\n", Some(base), false));
        assert_eq!(
            rendered,
            format!(
                "FROM base:py3.11\n\
             ENV DEBIAN_FRONTEND=noninteractive\n\
             ENV PYTHONUNBUFFERED=1\n\
             ENV LD_LIBRARY_PATH=$LD_LIBRARY_PATH:/usr/lib/x86_64-linux-gnu\n\
             # --> Installing prediction server\n\
             RUN pip install --no-cache-dir kiln=={TOOL_VERSION}\n\
             # --> Copying code\n\
             WORKDIR /src\n\
             COPY . /src\n\
             ENV KILN_PREDICT=predict.py:Predictor\n\
             CMD [\"python\", \"-m\", \"kiln.server.http\"]\n"
            )
        );
    }

    #[test]
    fn render_packages_and_requirements() {
        let rendered = render(&plan(
            "build:\n  system_packages: [ffmpeg, cowsay]\n  python_requirements: my-requirements.txt\npredict: predict.py:Predictor\n",
            None,
            false,
        ));
        assert!(rendered.starts_with("FROM ubuntu:22.04\n"));
        assert!(rendered.contains(
            "RUN apt-get update -qq && apt-get install -qqy --no-install-recommends ffmpeg cowsay && rm -rf /var/lib/apt/lists/*\n"
        ));
        assert!(rendered.contains("COPY my-requirements.txt /tmp/requirements.txt\n"));
        assert!(rendered.contains("pyenv install-latest \"3.11\""));
    }

    #[test]
    fn render_gpu_scratch_uses_cuda_image() {
        let toolkit = Toolkit {
            cuda: Version::parse("11.8").expect("version"),
            cudnn: Version::parse("8").expect("version"),
        };
        let base = from_scratch(&Version::parse("3.8").expect("version"), Some(toolkit));
        let rendered = render(&plan(
            "build:\n  python_version: \"3.8\"\n  gpu: true\npredict: predict.py:Predictor\n",
            Some(base),
            false,
        ));
        assert!(rendered.starts_with("FROM nvidia/cuda:11.8.0-cudnn8-devel-ubuntu22.04\n"));
        assert!(rendered.contains("# --> Using CUDA 11.8 / cuDNN 8\n"));
    }

    #[test]
    fn render_precompile_step() {
        let rendered = render(&plan("predict: predict.py:Predictor\n", None, true));
        let copy = rendered.find("COPY . /src").expect("copy step");
        let precompile = rendered
            .find("RUN python -m compileall -q /src || true\n")
            .expect("precompile step");
        assert!(copy < precompile);
        assert!(!rendered.contains("pip check"));
    }

    #[test]
    fn render_is_deterministic() {
        let yaml = "build:\n  python_packages: [numpy, pandas]\npredict: predict.py:Predictor\n";
        assert_eq!(render(&plan(yaml, None, true)), render(&plan(yaml, None, true)));
    }
}
