//! Flow file loading — the metadata envelope around a step sequence.
//!
//! Parsing the `Step` payload itself is ordinary serde (see [`crate::step`]);
//! what this module adds is the surrounding `name`/`app_id`/`description`
//! envelope the CLI reports on, plus directory discovery for `suite` runs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::step::Step;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowFile {
    pub name: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub on_flow_start: Vec<Step>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub on_flow_complete: Vec<Step>,
}

impl FlowFile {
    /// Load a `*.flow.yaml`/`*.flow.json` file. YAML and JSON share the same
    /// shape; the extension only picks the deserializer.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read flow file '{}'", path.display()))?;

        let flow: FlowFile = if is_json(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON flow in '{}'", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid YAML flow in '{}'", path.display()))?
        };

        if flow.steps.is_empty() {
            bail!("flow '{}' has no steps", flow.name);
        }
        Ok(flow)
    }

    /// All `*.flow.yaml`/`*.flow.json` files directly under `dir`, sorted by
    /// filename so suite runs are deterministic.
    pub fn discover(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for pattern in ["*.flow.yaml", "*.flow.yml", "*.flow.json"] {
            let glob_pattern = dir.join(pattern);
            let glob_str = glob_pattern
                .to_str()
                .with_context(|| format!("non-utf8 suite directory path: {}", dir.display()))?;
            for entry in glob::glob(glob_str)
                .with_context(|| format!("bad glob pattern for suite directory '{}'", dir.display()))?
            {
                if let Ok(path) = entry {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hermitflow_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_a_minimal_yaml_flow() {
        let path = write_temp("minimal.flow.yaml", r#"
name: Login
app_id: com.example.app
steps:
  - kind: tap
    selector:
      text: "Login"
"#);
        let flow = FlowFile::load(&path).unwrap();
        assert_eq!(flow.name, "Login");
        assert_eq!(flow.app_id.as_deref(), Some("com.example.app"));
        assert_eq!(flow.steps.len(), 1);
    }

    #[test]
    fn rejects_a_flow_with_no_steps() {
        let path = write_temp("empty.flow.yaml", "name: Empty\nsteps: []\n");
        let err = FlowFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let path = write_temp("broken.flow.yaml", "not: [valid");
        assert!(FlowFile::load(&path).is_err());
    }
}
