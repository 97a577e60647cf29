//! Wires the configured adapters into a conductor.

use anyhow::{Context, Result};
use faultbench_adapters::{
    AgentLauncher, CommandExecutor, CommandWorkload, FeatureFlagInjector, KubePatchInjector,
    KubectlCluster, ShellApplication,
};
use faultbench_core::{AgentRegistry, ArenaConfig, Conductor, Platform, ProblemRegistry};
use faultbench_proto::{ClusterControl, FaultInjector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Builds the platform: kubectl cluster, shell applications, both
/// injector backends and the command workload.
pub fn build_platform(config: &ArenaConfig) -> Platform {
    let policy = config.poll_policy();
    let cluster = Arc::new(KubectlCluster::from_config(&config.cluster, &config.conductor, policy));

    // Application steps (helm installs, load runs) are bounded by the convergence timeout.
    let step_timeout = Duration::from_secs(
        config
            .convergence
            .timeout_seconds
            .max(config.cluster.command_timeout_seconds),
    );
    let executor = CommandExecutor::new(&config.conductor.shell).with_timeout(step_timeout);

    let mut platform = Platform::new(Arc::clone(&cluster) as Arc<dyn ClusterControl>);
    for app in &config.applications {
        platform = platform.with_application(Arc::new(ShellApplication::new(
            app.clone(),
            executor.clone(),
            Arc::clone(&cluster) as Arc<dyn ClusterControl>,
            policy.timeout,
        )));
    }

    let flags = config.injectors.feature_flag.clone();
    let flag_cluster = Arc::clone(&cluster);
    platform = platform.with_injector("feature_flag", move |namespace: &str| {
        let injector =
            FeatureFlagInjector::new(Arc::clone(&flag_cluster), namespace, flags.clone());
        Ok(Arc::new(injector) as Arc<dyn FaultInjector>)
    });

    let patches = config.injectors.kube_patch.clone();
    let patch_cluster = Arc::clone(&cluster);
    platform = platform.with_injector("kube_patch", move |namespace: &str| {
        let injector =
            KubePatchInjector::new(Arc::clone(&patch_cluster), namespace, patches.clone());
        Ok(Arc::new(injector) as Arc<dyn FaultInjector>)
    });

    let workload = CommandWorkload::from_applications(executor, &config.applications);
    if !workload.is_empty() {
        platform = platform.with_workload(Arc::new(workload));
    }
    platform
}

/// First word of every command line the adapters will run.
pub fn required_binaries(config: &ArenaConfig) -> Vec<String> {
    let mut binaries = Vec::new();
    let app_commands = config.applications.iter().flat_map(|app| {
        [
            app.deploy_command.as_ref(),
            app.cleanup_command.as_ref(),
            app.workload_start_command.as_ref(),
            app.workload_command.as_ref(),
        ]
    });
    let commands = std::iter::once(Some(&config.cluster.kubectl)).chain(app_commands);
    for command in commands.flatten() {
        if let Some(program) = command.split_whitespace().next()
            && !binaries.iter().any(|b| b == program)
        {
            binaries.push(program.to_string());
        }
    }
    binaries
}

/// Everything one CLI session owns.
pub struct Session {
    pub conductor: Arc<Conductor>,
    pub agents: AgentRegistry,
    pub agents_file: PathBuf,
    pub launcher: AgentLauncher,
    pub use_colors: bool,
}

impl Session {
    pub fn new(config: &ArenaConfig, agents_file: PathBuf, use_colors: bool) -> Result<Self> {
        let registry =
            ProblemRegistry::from_config(config).context("Failed to build problem catalog")?;
        let conductor = Conductor::new(registry, build_platform(config), &config.conductor);

        let mut agents = AgentRegistry::from_registrations(config.agents.iter().cloned());
        let saved = AgentRegistry::load(&agents_file)
            .with_context(|| {
                format!("Failed to load agent registry from {}", agents_file.display())
            })?;
        for registration in saved.list() {
            if agents.register(registration.clone()).is_some() {
                debug!(agent = %registration.name, "Saved registration overrides config");
            }
        }

        Ok(Self {
            conductor: Arc::new(conductor),
            agents,
            agents_file,
            launcher: AgentLauncher::new(),
            use_colors,
        })
    }

    /// Recovers and cleans up the active problem, removes standalone
    /// deployments and stops launched agents.
    pub async fn shutdown(&self) {
        if let Err(e) = self.conductor.shutdown().await {
            warn!(error = %e, class = e.class(), "Shutdown did not complete cleanly");
        }
        self.launcher.shutdown().await;
    }
}
