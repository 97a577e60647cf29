//! Registered agents that can be kicked off from the REPL.
//!
//! The registry is an owned value handed to whoever needs it; entries live
//! until explicitly removed.

use faultbench_proto::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How to launch one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,

    /// Shell command line that starts the agent.
    #[serde(alias = "kickoff_command")]
    pub command: String,

    /// Working directory; the current directory when absent.
    #[serde(default, alias = "kickoff_workdir")]
    pub workdir: Option<PathBuf>,

    /// Environment overrides applied on top of the inherited environment.
    #[serde(default, alias = "kickoff_env")]
    pub env: BTreeMap<String, String>,
}

impl AgentRegistration {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Parses a `register-agent` JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let registration: Self = serde_json::from_str(payload)
            .map_err(|e| Error::config(format!("bad register-agent payload: {e}")))?;
        registration.validate()?;
        Ok(registration)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("agent name must not be empty"));
        }
        if self.command.trim().is_empty() {
            return Err(Error::config(format!("agent '{}' has an empty command", self.name)));
        }
        Ok(())
    }
}

/// Agent registrations keyed by name.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentRegistration>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registrations(registrations: impl IntoIterator<Item = AgentRegistration>) -> Self {
        let mut registry = Self::new();
        for registration in registrations {
            registry.register(registration);
        }
        registry
    }

    /// Inserts or replaces a registration. Returns the previous entry.
    pub fn register(&mut self, registration: AgentRegistration) -> Option<AgentRegistration> {
        info!(agent = %registration.name, command = %registration.command, "Agent registered");
        self.agents.insert(registration.name.clone(), registration)
    }

    pub fn remove(&mut self, name: &str) -> Option<AgentRegistration> {
        self.agents.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AgentRegistration> {
        self.agents.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &AgentRegistration> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Loads registrations from a YAML list. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No agent registry file");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let registrations: Vec<AgentRegistration> = serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        for registration in &registrations {
            registration.validate()?;
        }
        Ok(Self::from_registrations(registrations))
    }

    /// Writes all registrations as a YAML list.
    pub fn save(&self, path: &Path) -> Result<()> {
        let registrations: Vec<&AgentRegistration> = self.agents.values().collect();
        let yaml = serde_yaml::to_string(&registrations)
            .map_err(|e| Error::config(format!("cannot serialize agent registry: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, yaml)?;
        debug!(path = %path.display(), agents = registrations.len(), "Agent registry saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces() {
        let mut registry = AgentRegistry::new();
        let first = registry.register(AgentRegistration::new("stratus", "python -m stratus"));
        assert!(first.is_none());
        let previous = registry
            .register(AgentRegistration::new("stratus", "python -m stratus --fast"))
            .unwrap();
        assert_eq!(previous.command, "python -m stratus");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("stratus").unwrap().command, "python -m stratus --fast");
    }

    #[test]
    fn test_from_json_accepts_kickoff_aliases() {
        let payload = r#"{
            "name": "stratus",
            "kickoff_command": "python -m clients.stratus",
            "kickoff_workdir": ".",
            "kickoff_env": {"KUBECONFIG": "/tmp/kube"}
        }"#;
        let registration = AgentRegistration::from_json(payload).unwrap();
        assert_eq!(registration.command, "python -m clients.stratus");
        assert_eq!(registration.workdir, Some(PathBuf::from(".")));
        assert_eq!(registration.env["KUBECONFIG"], "/tmp/kube");
    }

    #[test]
    fn test_from_json_rejects_empty_command() {
        let err = AgentRegistration::from_json(r#"{"name":"x","command":"  "}"#).unwrap_err();
        assert_eq!(err.class(), "ConfigurationError");
        assert!(AgentRegistration::from_json("not json").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("agents.yml");

        let mut registry = AgentRegistry::new();
        registry.register(AgentRegistration::new("a", "echo a").with_env("MODE", "ci"));
        registry.register(AgentRegistration::new("b", "echo b").with_workdir("/tmp"));
        registry.save(&path).unwrap();

        let loaded = AgentRegistry::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("a").unwrap().env["MODE"], "ci");
        assert_eq!(loaded.get("b").unwrap().workdir, Some(PathBuf::from("/tmp")));

        let mut loaded = loaded;
        assert!(loaded.remove("a").is_some());
        assert!(loaded.get("a").is_none());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::load(&dir.path().join("absent.yml")).unwrap();
        assert!(registry.is_empty());
    }
}
