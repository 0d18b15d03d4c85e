//! Session information: build, platform, dependencies and run parameters

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::io::tables::write_text;

const MANIFEST: &str = include_str!("../Cargo.toml");

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub package: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub rayon_threads: usize,
    pub available_cpus: usize,
    /// (name, version requirement) from the manifest
    pub dependencies: Vec<(String, String)>,
    pub parameters: serde_json::Value,
}

/// `[dependencies]` entries of a Cargo manifest, sorted by name
///
/// A dependency is either a version string or a table with a `version` key;
/// path and git dependencies without a version are listed as `*`.
fn manifest_dependencies(manifest: &str) -> Result<Vec<(String, String)>> {
    let table: toml::Table = manifest.parse().map_err(|e: toml::de::Error| AnalysisError::ConfigError {
        reason: format!("invalid Cargo manifest: {}", e),
    })?;
    let Some(deps) = table.get("dependencies").and_then(toml::Value::as_table) else {
        return Ok(Vec::new());
    };
    Ok(deps
        .iter()
        .map(|(name, spec)| {
            let version = match spec {
                toml::Value::String(v) => v.as_str(),
                toml::Value::Table(t) => t.get("version").and_then(toml::Value::as_str).unwrap_or("*"),
                _ => "*",
            };
            (name.clone(), version.to_string())
        })
        .collect())
}

impl SessionInfo {
    /// Capture the current session with the given run parameters
    pub fn collect<T: Serialize>(parameters: &T) -> Result<Self> {
        Ok(Self {
            package: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            rayon_threads: rayon::current_num_threads(),
            available_cpus: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            dependencies: manifest_dependencies(MANIFEST)?,
            parameters: serde_json::to_value(parameters)?,
        })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_text(path, &self.to_string())
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.package, self.version)?;
        writeln!(f, "platform: {}-{}", self.arch, self.os)?;
        writeln!(f, "threads: {} (of {} available CPUs)", self.rayon_threads, self.available_cpus)?;
        writeln!(f)?;
        writeln!(f, "dependencies:")?;
        for (name, version) in &self.dependencies {
            writeln!(f, "  {} {}", name, version)?;
        }
        writeln!(f)?;
        writeln!(f, "parameters:")?;
        let params = serde_json::to_string_pretty(&self.parameters).map_err(|_| fmt::Error)?;
        writeln!(f, "{}", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_dependencies() {
        let manifest = "[package]\nname = \"x\"\n\n[dependencies]\nlog = \"0.4\"\nserde = { version = \"1.0\", features = [\"derive\"] }\n\n[dev-dependencies]\ntempfile = \"3\"\n";
        let deps = manifest_dependencies(manifest).unwrap();
        assert_eq!(deps, vec![("log".to_string(), "0.4".to_string()), ("serde".to_string(), "1.0".to_string())]);
    }

    #[test]
    fn test_manifest_dependency_tables() {
        let manifest = "[dependencies]\nclap = { features = [\"derive\"], version = \"4.5\" }\nlocal = { path = \"../local\" }\n\n[dependencies.svg]\nversion = \"0.18\"\n";
        let deps = manifest_dependencies(manifest).unwrap();
        assert_eq!(
            deps,
            vec![
                ("clap".to_string(), "4.5".to_string()),
                ("local".to_string(), "*".to_string()),
                ("svg".to_string(), "0.18".to_string()),
            ],
            "versions come from the version key, after features"
        );
        assert!(manifest_dependencies("[dependencies\n").is_err());
    }

    #[test]
    fn test_session_info_lists_crate_and_parameters() {
        let info = SessionInfo::collect(&serde_json::json!({ "alpha": 0.05 })).unwrap();
        assert_eq!(info.package, "rnaseq_de");
        assert!(info.dependencies.iter().any(|(name, _)| name == "ndarray"));
        let text = info.to_string();
        assert!(text.contains("\"alpha\": 0.05"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_info.txt");
        info.write(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("rnaseq_de"));
    }
}
