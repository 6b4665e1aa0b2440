//! `turingos-cli` – TuringOS Command Line Interface
//!
//! The `turingos` binary wires the whole stack together:
//!
//! 1. Loads `~/.turingos/config.toml` plus `TURINGOS_*` overrides.
//! 2. Builds the manifold, journal, oracle (single lane or dispatcher),
//!    execution contract and halt verifier.
//! 3. Spawns the root planner for the given task and runs the scheduler until
//!    nothing is runnable, the turn budget is spent or Ctrl-C is pressed.
//!
//! `turingos verify-journal` re-checks the Merkle chain of an existing run and
//! `turingos config` inspects or initialises the config file.

mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use turingos_journal::Journal;
use turingos_manifold::Manifold;
use turingos_middleware::{EventBus, Topic};
use turingos_runtime::{
    DispatcherOracle, ExecutionContract, HaltVerifier, LlmOracle, OpenContract, Oracle,
    RequiredFilesContract, RunSummary, Scheduler, SchedulerConfig, TickEngine,
};
use turingos_types::EventPayload;

#[derive(Parser)]
#[command(name = "turingos", about = "Agent-process kernel for LLM oracles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task to completion
    Run {
        /// Initial task text for the root planner (q0)
        task: String,
        /// Initial pointer (d0)
        #[arg(short, long, default_value = ".")]
        pointer: String,
        #[arg(short, long)]
        workspace: Option<PathBuf>,
        #[arg(long)]
        max_turns: Option<u64>,
        /// Acceptance command locked on the first halt
        #[arg(long)]
        halt_command: Option<String>,
        /// Workspace file the root planner must produce before halting (repeatable)
        #[arg(long = "require")]
        required_files: Vec<String>,
        /// Route through the dual-lane dispatcher
        #[arg(long)]
        dual_lane: bool,
    },
    /// Verify the Merkle chain of a journal directory
    VerifyJournal {
        /// Defaults to the configured journal directory
        dir: Option<PathBuf>,
    },
    /// Inspect or initialise ~/.turingos/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Before the Tokio runtime exists; see telemetry::build_provider.
    let _telemetry = turingos_runtime::init_tracing("turingos");

    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let code = match cli.command {
        Commands::Run {
            task,
            pointer,
            workspace,
            max_turns,
            halt_command,
            required_files,
            dual_lane,
        } => {
            if let Some(ws) = workspace {
                cfg.workspace = ws.to_string_lossy().into_owned();
            }
            if let Some(turns) = max_turns {
                cfg.max_turns = turns;
            }
            if halt_command.is_some() {
                cfg.halt_command = halt_command;
            }
            if !required_files.is_empty() {
                cfg.required_files = required_files;
            }
            cfg.dual_lane |= dual_lane;
            run_command(&cfg, &task, &pointer)
        }
        Commands::VerifyJournal { dir } => verify_journal(dir.unwrap_or_else(|| cfg.journal_path())),
        Commands::Config { command } => config_command(&cfg, command),
    };
    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run_command(cfg: &config::Config, task: &str, pointer: &str) -> i32 {
    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping after the current turn …".yellow().bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will abort mid-turn");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return 1;
        }
    };

    match runtime.block_on(run(cfg, task, pointer, shutdown)) {
        Ok(summary) => {
            print_summary(&summary);
            if summary.root_output.is_some() && summary.killed.is_empty() {
                0
            } else {
                2
            }
        }
        Err(e) => {
            println!("{}: {}", "Run failed".red().bold(), e);
            1
        }
    }
}

async fn run(
    cfg: &config::Config,
    task: &str,
    pointer: &str,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary, String> {
    let workspace = cfg.workspace_path();
    std::fs::create_dir_all(&workspace)
        .map_err(|e| format!("Failed to create workspace {}: {}", workspace.display(), e))?;

    let bus = EventBus::default();
    spawn_trap_printer(&bus);

    let manifold = Manifold::open(cfg.manifold_config()).map_err(|e| e.to_string())?;
    let journal = Journal::open_dir(cfg.journal_path())
        .map_err(|e| e.to_string())?
        .with_bus(bus.clone());

    let routine = LlmOracle::new(&cfg.routine_url, &cfg.routine_model)
        .with_api_key(cfg.api_key.expose())
        .with_timeout(cfg.oracle_timeout());
    let oracle: Box<dyn Oracle> = if cfg.dual_lane {
        let recovery = LlmOracle::new(&cfg.recovery_url, &cfg.recovery_model)
            .with_api_key(cfg.api_key.expose())
            .with_timeout(cfg.oracle_timeout());
        Box::new(
            DispatcherOracle::new(Box::new(recovery), Box::new(routine), cfg.dispatcher_config())
                .with_bus(bus.clone()),
        )
    } else {
        Box::new(routine)
    };

    let contract: Arc<dyn ExecutionContract> = if cfg.required_files.is_empty() {
        Arc::new(OpenContract)
    } else {
        Arc::new(RequiredFilesContract::new(&workspace, cfg.required_files.clone()))
    };

    let engine = TickEngine::new(manifold, journal, oracle, cfg.tick_engine_config())
        .with_contract(contract)
        .with_bus(bus.clone());
    let verifier = HaltVerifier::new(&workspace).with_initializer(cfg.halt_command.clone());
    let mut scheduler = Scheduler::new(engine, verifier, SchedulerConfig::default())
        .with_bus(bus)
        .with_shutdown_flag(shutdown);

    let oracle_label = if cfg.dual_lane {
        format!("dispatcher(P={}, E={})", cfg.recovery_model, cfg.routine_model)
    } else {
        cfg.routine_model.clone()
    };
    println!(
        "  Workspace {}  ·  oracle {}  ·  journal {}\n",
        workspace.display().to_string().bold(),
        oracle_label.cyan(),
        cfg.journal_path().display().to_string().dimmed()
    );

    scheduler
        .spawn_root(task, pointer)
        .map_err(|e| e.to_string())?;
    scheduler
        .run_until_idle(cfg.max_turns)
        .await
        .map_err(|e| e.to_string())
}

fn spawn_trap_printer(bus: &EventBus) {
    let mut traps = bus.subscribe_to(Topic::Traps);
    tokio::spawn(async move {
        while let Ok(event) = traps.recv().await {
            if let EventPayload::Trap { pid, frame } = event.payload {
                println!(
                    "  {} pid={} {}",
                    "TRAP".yellow().bold(),
                    pid,
                    format!("{} {}", frame.trap_base, frame.details).dimmed()
                );
            }
        }
    });
}

fn print_summary(summary: &RunSummary) {
    let list = |pids: &[turingos_types::Pid]| {
        pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
    };
    println!();
    if summary.interrupted {
        println!("  {}", "Interrupted.".yellow().bold());
    }
    println!("  Turns       {}", summary.turns);
    println!("  Terminated  [{}]", list(&summary.terminated).green());
    println!("  Killed      [{}]", list(&summary.killed).red());
    println!("  Unfinished  [{}]", list(&summary.unfinished).yellow());
    println!("  Price       {:.2}", summary.root_price);
    match &summary.root_output {
        Some(output) => println!("  Output      {}", output.bold()),
        None => println!("  Output      {}", "<none>".dimmed()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// verify-journal / config
// ─────────────────────────────────────────────────────────────────────────────

fn verify_journal(dir: PathBuf) -> i32 {
    let journal = match Journal::open_dir(&dir) {
        Ok(journal) => journal,
        Err(e) => {
            println!("{}: {}", "Cannot open journal".red(), e);
            return 1;
        }
    };
    match journal.verify_chain() {
        Ok(report) => {
            println!(
                "  {} {} records, head {}",
                "✓".green().bold(),
                report.records,
                report.head.dimmed()
            );
            if let Ok(Some(cursor)) = journal.read_replay_cursor() {
                println!("  Last replay marker at tick {}", cursor.tick_seq);
            }
            0
        }
        Err(e) => {
            println!("{} {}", "✗ chain broken:".red().bold(), e);
            1
        }
    }
}

fn config_command(cfg: &config::Config, command: ConfigCommands) -> i32 {
    match command {
        ConfigCommands::Show => {
            println!("  {}", config::config_path().display().to_string().bold());
            println!("{:#?}", cfg);
            0
        }
        ConfigCommands::Init { force } => {
            let path = config::config_path();
            if path.exists() && !force {
                println!(
                    "  {} already exists; pass {} to overwrite.",
                    path.display(),
                    "--force".bold()
                );
                return 1;
            }
            match config::save(&config::Config::default()) {
                Ok(()) => {
                    println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
                    0
                }
                Err(e) => {
                    println!("{}: {}", "Error saving config".red(), e);
                    1
                }
            }
        }
    }
}

fn print_banner() {
    println!();
    println!("  {} {}",
        "TuringOS".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Agent-process kernel");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_repeatable_requirements() {
        let cli = Cli::try_parse_from([
            "turingos",
            "run",
            "build the parser",
            "--require",
            "src/lib.rs",
            "--require",
            "tests/ok.rs",
            "--max-turns",
            "40",
            "--dual-lane",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                task,
                pointer,
                max_turns,
                required_files,
                dual_lane,
                ..
            } => {
                assert_eq!(task, "build the parser");
                assert_eq!(pointer, ".");
                assert_eq!(max_turns, Some(40));
                assert_eq!(required_files, vec!["src/lib.rs", "tests/ok.rs"]);
                assert!(dual_lane);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parses_config_init_force() {
        let cli = Cli::try_parse_from(["turingos", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Init { force: true }
            }
        ));
    }

    #[test]
    fn verify_journal_accepts_a_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(verify_journal(dir.path().join("journal")), 0);
    }
}
