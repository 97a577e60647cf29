//! Applications driven by configured shell commands.

use crate::command_executor::CommandExecutor;
use crate::workload::app_env;
use async_trait::async_trait;
use faultbench_core::ApplicationConfig;
use faultbench_proto::{Application, ClusterControl, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// [`Application`] whose lifecycle steps are shell commands (typically
/// `helm install` / `helm uninstall`).
///
/// After deploy, waits for `ready_selector` pods when one is configured.
pub struct ShellApplication {
    config: ApplicationConfig,
    executor: CommandExecutor,
    cluster: Arc<dyn ClusterControl>,
    ready_timeout: Duration,
}

impl ShellApplication {
    pub fn new(
        config: ApplicationConfig,
        executor: CommandExecutor,
        cluster: Arc<dyn ClusterControl>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            config,
            executor,
            cluster,
            ready_timeout,
        }
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    async fn run_step(&self, step: &str, command: Option<&String>) -> Result<()> {
        let Some(command) = command else {
            debug!(app = %self.config.name, step, "No command configured, skipping");
            return Ok(());
        };
        info!(app = %self.config.name, step, "Running application step");
        app_env(&self.executor, self).run(command).await?;
        Ok(())
    }
}

#[async_trait]
impl Application for ShellApplication {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn frontend_service(&self) -> Option<&str> {
        self.config.frontend_service.as_deref()
    }

    fn frontend_port(&self) -> Option<u16> {
        self.config.frontend_port
    }

    async fn deploy(&self) -> Result<()> {
        self.run_step("deploy", self.config.deploy_command.as_ref()).await?;
        if let Some(selector) = &self.config.ready_selector {
            self.cluster
                .wait_for_ready(&self.config.namespace, selector, self.ready_timeout)
                .await?;
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.run_step("cleanup", self.config.cleanup_command.as_ref()).await
    }

    async fn start_workload(&self) -> Result<()> {
        self.run_step("start_workload", self.config.workload_start_command.as_ref()).await
    }
}
