//! Terminal output: banners, panels and the final results box.

use clap::ValueEnum;
use faultbench_proto::{OracleResult, Verdict};
use std::io::{IsTerminal, stdout};
use std::path::Path;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    pub fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

const WIDTH: usize = 58;

pub const OPTIONS: &[&str] = &[
    "start <problem_id>        begin a new problem",
    "deploy <app> / undeploy <app>   manage standalone apps",
    "list                      show deployed apps",
    "problems                  show the problem catalog",
    "status                    show the active problem",
    "agents                    show registered agents",
    "register-agent <json>     register or update an agent",
    "kickoff-agent <name>      launch a registered agent",
    "stop-agent <name>         stop a launched agent",
    "options                   re-print this list",
    "exit                      quit (recovers any injected fault)",
];

pub fn print_welcome(use_colors: bool) {
    use colors::*;

    if use_colors {
        println!("\n{BOLD}{CYAN}faultbench{RESET}  fault-injection benchmark for SRE agents");
    } else {
        println!("\nfaultbench  fault-injection benchmark for SRE agents");
    }
    print_options(use_colors);
    if use_colors {
        println!(
            "{YELLOW}{BOLD}[WARNING]{RESET} Starting a new problem will restart any running app. \
             Make sure you finish working before you start.\n"
        );
    } else {
        println!(
            "[WARNING] Starting a new problem will restart any running app. \
             Make sure you finish working before you start.\n"
        );
    }
}

pub fn print_options(use_colors: bool) {
    let lines: Vec<String> = OPTIONS.iter().map(|s| (*s).to_string()).collect();
    print_panel("Options", &lines, use_colors);
}

/// Prints lines inside a titled box.
pub fn print_panel(title: &str, lines: &[String], use_colors: bool) {
    use colors::*;

    let separator = "─".repeat(WIDTH);
    if use_colors {
        println!("{BOLD}┌{separator}┐{RESET}");
        println!("{BOLD}│{RESET} {BOLD}{title}{RESET}");
        println!("{BOLD}├{separator}┤{RESET}");
        for line in lines {
            println!("{BOLD}│{RESET}   {line}");
        }
        println!("{BOLD}└{separator}┘{RESET}");
    } else {
        println!("+{}+", "-".repeat(WIDTH));
        println!("| {title}");
        println!("+{}+", "-".repeat(WIDTH));
        for line in lines {
            println!("|   {line}");
        }
        println!("+{}+", "-".repeat(WIDTH));
    }
}

/// Prints an error with its taxonomy class.
pub fn print_error(err: &faultbench_proto::Error, use_colors: bool) {
    use colors::*;

    if use_colors {
        println!("{RED}✗ {}{RESET}: {err}", err.class());
    } else {
        println!("✗ {}: {err}", err.class());
    }
}

fn oracle_line(name: &str, result: &OracleResult, use_colors: bool) -> String {
    use colors::*;

    let (color, icon) = match (result.success, result.passable) {
        (true, _) => (GREEN, "✓"),
        (false, true) => (YELLOW, "⚠"),
        (false, false) => (RED, "✗"),
    };
    let suffix = if result.passable { " (passable)" } else { "" };
    if use_colors {
        format!("{color}{BOLD}{icon}{RESET} {name}{DIM}{suffix}{RESET}")
    } else {
        format!("{icon} {name}{suffix}")
    }
}

/// Renders the final results box for a graded submission.
pub fn verdict_lines(verdict: &Verdict, artifact: Option<&Path>, use_colors: bool) -> Vec<String> {
    use colors::*;

    let mut lines = Vec::new();
    let (color, label) = if verdict.success { (GREEN, "PASSED") } else { (RED, "FAILED") };
    if use_colors {
        lines.push(format!("Problem:  {CYAN}{}{RESET}", verdict.problem_id));
        lines.push(format!("Result:   {color}{BOLD}{label}{RESET}"));
    } else {
        lines.push(format!("Problem:  {}", verdict.problem_id));
        lines.push(format!("Result:   {label}"));
    }
    lines.push(format!("Graded:   {}", verdict.graded_at.format("%Y-%m-%d %H:%M:%S UTC")));

    for (name, result) in &verdict.oracles {
        lines.push(oracle_line(name.as_str(), result, use_colors));
        for issue in &result.issues {
            lines.push(format!("    - {issue}"));
        }
    }
    if let Some(path) = artifact {
        lines.push(format!("Saved to: {}", path.display()));
    }
    lines
}

pub fn print_verdict(verdict: &Verdict, artifact: Option<&Path>, use_colors: bool) {
    print_panel("Final Results", &verdict_lines(verdict, artifact, use_colors), use_colors);
}
