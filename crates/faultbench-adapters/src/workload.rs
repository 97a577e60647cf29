//! Load generator wrapper around per-application shell commands.

use crate::command_executor::CommandExecutor;
use async_trait::async_trait;
use faultbench_core::ApplicationConfig;
use faultbench_proto::{Application, Error, Result, WorkloadGenerator};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Runs each application's `workload_command` and returns its output as the
/// workload report.
///
/// The command sees `FAULTBENCH_APP`, `FAULTBENCH_NAMESPACE` and, when the
/// application exposes one, `FAULTBENCH_FRONTEND` (`service:port`).
#[derive(Debug, Clone)]
pub struct CommandWorkload {
    executor: CommandExecutor,
    commands: BTreeMap<String, String>,
}

impl CommandWorkload {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            commands: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, app: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(app.into(), command.into());
        self
    }

    /// Collects the workload commands of every configured application.
    pub fn from_applications(executor: CommandExecutor, apps: &[ApplicationConfig]) -> Self {
        apps.iter()
            .filter_map(|app| Some((app.name.clone(), app.workload_command.clone()?)))
            .fold(Self::new(executor), |workload, (app, cmd)| workload.with_command(app, cmd))
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Environment handed to workload commands for `app`.
pub(crate) fn app_env(executor: &CommandExecutor, app: &dyn Application) -> CommandExecutor {
    let mut executor = executor
        .clone()
        .with_env("FAULTBENCH_APP", app.name())
        .with_env("FAULTBENCH_NAMESPACE", app.namespace());
    if let (Some(service), Some(port)) = (app.frontend_service(), app.frontend_port()) {
        executor = executor.with_env("FAULTBENCH_FRONTEND", format!("{service}:{port}"));
    }
    executor
}

#[async_trait]
impl WorkloadGenerator for CommandWorkload {
    async fn run(&self, app: &dyn Application) -> Result<String> {
        let command = self
            .commands
            .get(app.name())
            .ok_or_else(|| {
                Error::config(format!("application '{}' has no workload_command", app.name()))
            })?;

        info!(app = app.name(), "Running workload generator");
        let report = app_env(&self.executor, app).run(command).await?;
        debug!(app = app.name(), bytes = report.len(), "Workload report collected");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultbench_core::testing::FakeApplication;

    #[tokio::test]
    async fn test_report_is_command_output() {
        let app = FakeApplication::new("astronomy-shop", "shop");
        let command = r#"echo "Requests/sec: 10 ($FAULTBENCH_NAMESPACE $FAULTBENCH_FRONTEND)""#;
        let workload = CommandWorkload::new(CommandExecutor::default())
            .with_command("astronomy-shop", command);

        let report = workload.run(&app).await.unwrap();
        assert_eq!(report, "Requests/sec: 10 (shop frontend:8080)\n");
    }

    #[tokio::test]
    async fn test_missing_command_is_config_error() {
        let app = FakeApplication::new("hotel", "hotel");
        let workload = CommandWorkload::new(CommandExecutor::default());

        assert!(workload.is_empty());
        assert!(matches!(workload.run(&app).await, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_generator_failure_is_platform_error() {
        let app = FakeApplication::new("shop", "shop");
        let workload = CommandWorkload::new(CommandExecutor::default())
            .with_command("shop", "echo 'wrk: connection refused' >&2; exit 1");

        let err = workload.run(&app).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_from_applications_skips_apps_without_command() {
        let apps: Vec<ApplicationConfig> = serde_yaml::from_str(
            r"
- name: shop
  namespace: shop
  workload_command: wrk2 -R 10 http://frontend
- name: hotel
  namespace: hotel
",
        )
        .unwrap();

        let workload = CommandWorkload::from_applications(CommandExecutor::default(), &apps);
        assert_eq!(workload.commands.keys().collect::<Vec<_>>(), vec!["shop"]);
    }
}
