//! Project-type detection heuristic.
//!
//! Probes, in priority order, for the marker files of common ecosystems and
//! suggests a run command. For `package.json`, additionally inspects
//! `scripts` and `dependencies` to pick among several plausible dev
//! commands, even though `pyproject.toml → python -m pytest` runs tests
//! rather than a server (see DESIGN.md).

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ProjectType {
    pub detected: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_command: Option<String>,
}

impl ProjectType {
    fn not_detected() -> Self {
        Self {
            detected: false,
            kind: None,
            config_file: None,
            suggested_command: None,
        }
    }

    fn found(kind: &str, config_file: &str, command: &str) -> Self {
        Self {
            detected: true,
            kind: Some(kind.to_string()),
            config_file: Some(config_file.to_string()),
            suggested_command: Some(command.to_string()),
        }
    }
}

const MARKERS: &[(&str, &str, &str)] = &[
    ("Cargo.toml", "rust", "cargo run"),
    ("go.mod", "go", "go run ."),
    ("requirements.txt", "python", "python main.py"),
    ("Pipfile", "python", "pipenv run python main.py"),
    ("pyproject.toml", "python", "python -m pytest"),
    ("Gemfile", "ruby", "bundle exec rails server"),
    ("pom.xml", "java", "mvn spring-boot:run"),
    ("build.gradle", "java", "gradle bootRun"),
    ("composer.json", "php", "php artisan serve"),
];

pub fn detect(directory: &str) -> ProjectType {
    let dir = Path::new(directory);

    let package_json = dir.join("package.json");
    if package_json.is_file() {
        if let Ok(kind) = detect_node(&package_json) {
            return kind;
        }
        return ProjectType::found("node", "package.json", "npm start");
    }

    for (file, kind, command) in MARKERS {
        if dir.join(file).is_file() {
            return ProjectType::found(kind, file, command);
        }
    }

    ProjectType::not_detected()
}

fn detect_node(path: &Path) -> Result<ProjectType, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let json: Value = serde_json::from_str(&content).unwrap_or(Value::Null);

    if let Some(scripts) = json.get("scripts").and_then(Value::as_object) {
        for candidate in ["dev", "start", "serve", "develop", "watch"] {
            if scripts.contains_key(candidate) {
                return Ok(ProjectType::found("node", "package.json", &format!("npm run {candidate}")));
            }
        }
    }

    if let Some(deps) = json.get("dependencies").and_then(Value::as_object) {
        if deps.contains_key("next") || deps.contains_key("vite") {
            return Ok(ProjectType::found("node", "package.json", "npm run dev"));
        }
        if deps.contains_key("react-scripts") {
            return Ok(ProjectType::found("node", "package.json", "npm start"));
        }
    }

    Ok(ProjectType::found("node", "package.json", "npm start"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cargo_project() {
        let dir = std::env::temp_dir().join(format!("proj-type-cargo-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let result = detect(dir.to_str().unwrap());
        assert!(result.detected);
        assert_eq!(result.kind.as_deref(), Some("rust"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prefers_vite_dependency_over_plain_start() {
        let dir = std::env::temp_dir().join(format!("proj-type-vite-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.json"),
            r#"{"scripts":{},"dependencies":{"vite":"^5"}}"#,
        )
        .unwrap();
        let result = detect(dir.to_str().unwrap());
        assert_eq!(result.suggested_command.as_deref(), Some("npm run dev"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_markers_reports_not_detected() {
        let dir = std::env::temp_dir().join(format!("proj-type-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let result = detect(dir.to_str().unwrap());
        assert!(!result.detected);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
