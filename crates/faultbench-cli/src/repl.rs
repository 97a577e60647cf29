//! Interactive session.
//!
//! With no active problem, input lines are REPL commands. Once a problem is
//! started, every line is relayed to the cluster shell until a line carrying
//! the submission marker is graded; `exit` always quits.

use crate::display::{print_error, print_options, print_panel, print_verdict, print_welcome};
use crate::session::Session;
use faultbench_core::{AgentRegistration, Reply};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// What the loop does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Reads stdin until `exit`, EOF or Ctrl-C, then shuts the session down.
pub async fn run(session: &mut Session) -> anyhow::Result<()> {
    print_welcome(session.use_colors);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(session).await;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                warn!("Interrupt received, recovering and cleaning up");
                None
            }
        };
        let Some(line) = line else {
            debug!("Input closed");
            break;
        };
        if handle_line(session, &line).await == Flow::Exit {
            break;
        }
    }
    Ok(())
}

async fn prompt(session: &Session) {
    let label = match session.conductor.active_problem_id().await {
        Some(id) => format!("faultbench[{id}]> "),
        None => "faultbench> ".to_string(),
    };
    if session.use_colors {
        print!("\x1b[32m\x1b[1m{label}\x1b[0m");
    } else {
        print!("{label}");
    }
    let _ = std::io::stdout().flush();
}

/// Handles one input line.
pub async fn handle_line(session: &mut Session, line: &str) -> Flow {
    let text = line.trim();
    if text.is_empty() {
        return Flow::Continue;
    }
    if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
        return Flow::Exit;
    }

    if session.conductor.active_problem_id().await.is_some() {
        interact(session, text).await;
        return Flow::Continue;
    }
    command(session, text).await;
    Flow::Continue
}

/// Relays a command or grades a submission for the active problem.
async fn interact(session: &Session, text: &str) {
    match session.conductor.handle_input(text).await {
        Ok(Reply::Output(output)) => print!("{output}"),
        Ok(Reply::Graded(verdict)) => {
            let artifact = session.conductor.last_artifact();
            print_verdict(&verdict, artifact.as_deref(), session.use_colors);
        }
        Err(e) => print_error(&e, session.use_colors),
    }
}

async fn command(session: &mut Session, text: &str) {
    let (verb, arg) = match text.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (text, ""),
    };
    let colors = session.use_colors;

    match (verb.to_ascii_lowercase().as_str(), arg) {
        ("options" | "help", _) => print_options(colors),
        ("start", id) if !id.is_empty() => {
            if session.conductor.registry().get(id).is_none() {
                println!("Unknown problem id: {id}");
                return;
            }
            println!(
                "Starting problem '{id}': deploying, injecting the fault \
                 and waiting for convergence..."
            );
            match session.conductor.start_problem(id).await {
                Ok(()) => println!(
                    "Problem '{id}' is live. Investigate with shell commands; \
                     finish with {}{{...}})",
                    session.conductor.submit_marker()
                ),
                Err(e) => print_error(&e, colors),
            }
        }
        ("deploy", app) if !app.is_empty() => match session.conductor.deploy_app(app).await {
            Ok(()) => println!("Deployed '{app}'."),
            Err(e) => print_error(&e, colors),
        },
        ("undeploy", app) if !app.is_empty() => match session.conductor.undeploy_app(app).await {
            Ok(()) => println!("Removed '{app}'."),
            Err(e) => print_error(&e, colors),
        },
        ("list", _) => {
            let apps = session.conductor.deployed_apps().await;
            let lines = if apps.is_empty() { vec!["No apps deployed".to_string()] } else { apps };
            print_panel("Deployed Apps", &lines, colors);
        }
        ("problems", _) => {
            let lines: Vec<String> = session
                .conductor
                .registry()
                .all()
                .map(|p| format!("{}  ({} / {})", p.id, p.application, p.fault.name))
                .collect();
            print_panel("Problems", &lines, colors);
        }
        ("status", _) => {
            let mut lines = vec!["No active problem".to_string()];
            if let Some(verdict) = session.conductor.last_verdict() {
                let result = if verdict.success { "PASSED" } else { "FAILED" };
                lines.push(format!("Last verdict: {} {result}", verdict.problem_id));
            }
            print_panel("Status", &lines, colors);
        }
        ("agents", _) => {
            let running = session.launcher.running().await;
            let lines: Vec<String> = session
                .agents
                .list()
                .map(|reg| {
                    let state = if running.contains(&reg.name) { "running" } else { "idle" };
                    format!("- {}: command={:?} [{state}]", reg.name, reg.command)
                })
                .collect();
            if lines.is_empty() {
                println!("No registered agents.");
            } else {
                print_panel("Registered Agents", &lines, colors);
            }
        }
        ("register-agent", payload) if !payload.is_empty() => register_agent(session, payload),
        ("kickoff-agent", name) if !name.is_empty() => {
            let Some(registration) = session.agents.get(name).cloned() else {
                println!("No agent named '{name}' in registry.");
                return;
            };
            match session.launcher.ensure_started(&registration).await {
                Ok(handle) if handle.reused => println!("Agent '{name}' is already running."),
                Ok(handle) => {
                    let pid = handle.pid.unwrap_or_default();
                    println!("Kicked off agent '{name}' (pid {pid}).");
                }
                Err(e) => print_error(&e, colors),
            }
        }
        ("stop-agent", name) if !name.is_empty() => {
            if session.launcher.stop(name).await {
                println!("Stopped agent '{name}'.");
            } else {
                println!("Agent '{name}' is not running.");
            }
        }
        _ => println!("Invalid command. Type `options` to see choices."),
    }
}

fn register_agent(session: &mut Session, payload: &str) {
    let registration = match AgentRegistration::from_json(payload) {
        Ok(registration) => registration,
        Err(e) => {
            print_error(&e, session.use_colors);
            return;
        }
    };
    let name = registration.name.clone();
    session.agents.register(registration);
    match session.agents.save(&session.agents_file) {
        Ok(()) => {
            info!(agent = %name, path = %session.agents_file.display(), "Agent registered");
            println!("Registered agent '{name}'.");
        }
        Err(e) => print_error(&e, session.use_colors),
    }
}
