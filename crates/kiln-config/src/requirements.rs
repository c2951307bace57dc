//! Exact package pins from `python_packages` and requirements files.
//!
//! Only `name==version` specifiers count as pins. Ranges, URLs, editable
//! installs and pip options are ignored.

use std::path::Path;

use kiln_common::error::{KilnError, Result};

use crate::validator::ValidatedConfig;

/// Returns the version `package` is pinned to by the given specifiers.
///
/// Package names compare case-insensitively with `-`, `_` and `.`
/// treated alike. Extras, environment markers, trailing comments and local
/// version suffixes (`+cu118`) are stripped.
#[must_use]
pub fn pinned_version<'a>(
    specifiers: impl IntoIterator<Item = &'a str>,
    package: &str,
) -> Option<String> {
    let wanted = normalize(package);
    specifiers.into_iter().find_map(|line| {
        let (name, version) = split_pin(line)?;
        (normalize(name) == wanted).then(|| version.to_string())
    })
}

/// The version `package` is pinned to by a validated project, looking at
/// `python_packages` first and then the requirements file.
///
/// # Errors
///
/// Returns `KilnError::Io` if the requirements file cannot be read.
pub fn project_pin(
    project_dir: &Path,
    config: &ValidatedConfig,
    package: &str,
) -> Result<Option<String>> {
    let build = &config.config().build;
    if let Some(pin) = pinned_version(build.python_packages.iter().map(String::as_str), package) {
        return Ok(Some(pin));
    }
    let Some(relative) = &build.python_requirements else {
        return Ok(None);
    };
    let path = project_dir.join(relative);
    let content = std::fs::read_to_string(&path).map_err(|e| KilnError::Io {
        path: path.clone(),
        source: e,
    })?;
    let pin = pinned_version(content.lines(), package);
    tracing::debug!(package, pin = ?pin, file = %path.display(), "read requirements pin");
    Ok(pin)
}

fn split_pin(line: &str) -> Option<(&str, &str)> {
    let line = line.split('#').next().unwrap_or_default();
    let line = line.split(';').next().unwrap_or_default().trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let (name, rest) = line.split_once("==")?;
    if rest.starts_with('=') {
        return None;
    }
    let name = name.split('[').next().unwrap_or_default().trim();
    let version = rest.trim();
    let version = version.split('+').next().unwrap_or_default().trim();
    if name.is_empty() || version.is_empty() || version.contains([',', '*', ' ']) {
        return None;
    }
    Some((name, version))
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::{parse_descriptor, validate};

    use super::*;

    fn config(yaml: &str) -> ValidatedConfig {
        validate(&parse_descriptor(yaml).expect("descriptor")).expect("valid")
    }

    #[test]
    fn exact_pin_is_found() {
        let specs = ["numpy>=1.24", "torch==2.1.2", "pillow"];
        assert_eq!(pinned_version(specs, "torch").as_deref(), Some("2.1.2"));
    }

    #[test]
    fn pin_ignores_extras_markers_and_local_suffix() {
        assert_eq!(
            pinned_version(["Torch[cuda] == 2.1.2+cu118 ; python_version >= '3.8'  # gpu"], "torch")
                .as_deref(),
            Some("2.1.2")
        );
    }

    #[test]
    fn ranges_and_options_are_not_pins() {
        let specs = ["torch>=2.0", "--extra-index-url https://download.pytorch.org/whl", "torch===2.1.0", "torch==2.*"];
        assert_eq!(pinned_version(specs, "torch"), None);
    }

    #[test]
    fn names_compare_normalized() {
        assert_eq!(
            pinned_version(["Typing_Extensions==4.8.0"], "typing-extensions").as_deref(),
            Some("4.8.0")
        );
        assert_eq!(pinned_version(["torchvision==0.16.2"], "torch"), None);
    }

    #[test]
    fn project_pin_prefers_python_packages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config("build:\n  python_packages: [\"torch==1.13.0\"]\npredict: predict.py:Predictor\n");
        assert_eq!(
            project_pin(dir.path(), &cfg, "torch").expect("pin").as_deref(),
            Some("1.13.0")
        );
    }

    #[test]
    fn project_pin_reads_requirements_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("requirements.txt"),
            "# model deps\nnumpy==1.26.4\ntorch==2.1.2\n",
        )
        .expect("write");
        let cfg = config("build:\n  python_requirements: requirements.txt\npredict: predict.py:Predictor\n");
        assert_eq!(
            project_pin(dir.path(), &cfg, "torch").expect("pin").as_deref(),
            Some("2.1.2")
        );
    }

    #[test]
    fn project_without_pin_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config("build:\n  python_packages: [numpy]\npredict: predict.py:Predictor\n");
        assert_eq!(project_pin(dir.path(), &cfg, "torch").expect("pin"), None);
    }
}
