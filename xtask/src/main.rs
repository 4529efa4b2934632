use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the FaaS latency benchmark workspace",
    long_about = "A unified CLI for deploying benchmark functions, running the\n\
                  burst client, and running CI checks in this workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package and deploy the functions a configuration needs
    Setup {
        /// Arguments forwarded to `bench_setup`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Fire the configured bursts at the deployed gateways
    Client {
        /// Arguments forwarded to `bench_client`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run tests that deploy real functions (ignored tests in faas_bench_lambda)
    LiveTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build the release binaries
    Build,
    /// Run check + build
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_bin(bin: &str, forwarded: &[String]) {
    let mut args = vec!["run", "-p", "faas_bench_lambda", "--release", "--bin", bin];
    if !forwarded.is_empty() {
        args.push("--");
        args.extend(forwarded.iter().map(String::as_str));
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test faas_bench_core");
    run_cargo(&["test", "-p", "faas_bench_core"]);

    step("Test faas_bench_lambda");
    run_cargo(&["test", "-p", "faas_bench_lambda"]);
}

fn ci_build() {
    step("Build release binaries");
    run_cargo(&["build", "-p", "faas_bench_lambda", "--release", "--bins"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { args } => run_bin("bench_setup", &args),
        Commands::Client { args } => run_bin("bench_client", &args),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Build => ci_build(),
                CiJob::All => {
                    ci_check();
                    ci_build();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LiveTest => {
            run_cargo(&[
                "test",
                "-p",
                "faas_bench_lambda",
                "--test",
                "aws_connection_tests",
                "--",
                "--ignored",
            ]);
        }
    }
}
