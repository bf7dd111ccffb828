//! calcpilot CLI - natural-language edits to a live spreadsheet
//!
//! Usage:
//!   calcpilot run [--instruction TEXT]   Run the self-correcting loop
//!   calcpilot doctor [--model]           Check config, credentials and session
//!   calcpilot init                       Write a default config

use anyhow::{Context, Result};
use async_trait::async_trait;
use calcpilot_agent::{build_backend, resolve_api_key, ModelBackend};
use calcpilot_core::{CalcPilotConfig, LoopConfig, LoopResult, Provider, StopReason};
use calcpilot_orchestrator::{ExtensionPrompt, LoopEngine};
use calcpilot_session::{
    manual_start_hint, BridgeSession, CalcSession, MemorySession, PROTOCOL_VERSION,
};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{info, info_span, warn, Instrument, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "calcpilot")]
#[command(author, version, about = "Drive a live spreadsheet from natural-language instructions")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to .calcpilot/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generate/execute/evaluate loop on one instruction
    Run {
        /// Instruction to carry out (read from stdin when omitted)
        #[arg(short, long)]
        instruction: Option<String>,

        /// Iterations before asking for an extension
        #[arg(short = 'n', long)]
        max_iterations: Option<usize>,

        /// Use an in-memory workbook instead of the live session
        #[arg(long)]
        dry_run: bool,
    },

    /// Check configuration, credentials and the spreadsheet session
    Doctor {
        /// Also send a short request to the model
        #[arg(long)]
        model: bool,
    },

    /// Write a default config to .calcpilot/config.toml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = cli.command.unwrap_or(Commands::Run {
        instruction: None,
        max_iterations: None,
        dry_run: false,
    });

    match command {
        Commands::Run {
            instruction,
            max_iterations,
            dry_run,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let run_id = Uuid::new_v4().simple().to_string();
            let span = info_span!("run", id = %&run_id[..8]);
            cmd_run(config, instruction, max_iterations, dry_run)
                .instrument(span)
                .await
        }
        Commands::Doctor { model } => cmd_doctor(cli.config.as_deref(), model).await,
        Commands::Init { path, force } => cmd_init(path, force),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<CalcPilotConfig> {
    match explicit {
        Some(path) => CalcPilotConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            CalcPilotConfig::load_or_default(&cwd).context("Failed to load config")
        }
    }
}

/// Yes/no extension prompt on the terminal
///
/// The answer is read on a separate thread, so Ctrl-C ends the run while the
/// question is still open.
struct TerminalExtension;

#[async_trait]
impl ExtensionPrompt for TerminalExtension {
    async fn confirm_extension(&mut self, current_max: usize, step: usize) -> bool {
        print!(
            "Reached {} iterations. Continue for {} more? [y/N] ",
            current_max, step
        );
        if std::io::stdout().flush().is_err() {
            return false;
        }

        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let mut answer = String::new();
            let read = std::io::stdin().lock().read_line(&mut answer).map(|_| answer);
            // Nobody is waiting after an interrupt
            let _ = tx.send(read);
        });

        match rx.await {
            Ok(Ok(answer)) => is_yes(&answer),
            _ => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn read_instruction() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        print!("Instruction: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        Ok(line)
    } else {
        let mut text = String::new();
        for line in stdin.lock().lines() {
            text.push_str(&line?);
            text.push('\n');
        }
        Ok(text)
    }
}

async fn cmd_run(
    config: CalcPilotConfig,
    instruction: Option<String>,
    max_iterations: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let instruction = match instruction {
        Some(text) => text,
        None => read_instruction()?,
    };

    let mut loop_config = LoopConfig::from(&config.loop_defaults);
    if let Some(max) = max_iterations {
        anyhow::ensure!(max > 0, "--max-iterations must be at least 1");
        loop_config.max_iterations = max;
    }

    let model = build_backend(&config.model).context("Failed to set up the model backend")?;

    let session: Box<dyn CalcSession> = if dry_run {
        info!("Dry run: using an in-memory workbook");
        Box::new(MemorySession::new())
    } else {
        match BridgeSession::connect(&config.session).await {
            Ok(session) => {
                info!(
                    "Connected to {} (protocol v{})",
                    session.info().application,
                    session.info().protocol_version
                );
                Box::new(session)
            }
            Err(e) => {
                eprintln!("{}", manual_start_hint(&config.session.endpoint));
                return Err(e).context("Spreadsheet session unreachable");
            }
        }
    };

    println!("Starting loop...");
    println!("  Model: {}", model.name());
    println!("  Session: {}", session.endpoint());
    println!("  Max iterations: {}", loop_config.max_iterations);
    println!();

    let mut engine = LoopEngine::new(model, session, loop_config);
    if std::io::stdout().is_terminal() {
        engine = engine.with_extension_prompt(Box::new(TerminalExtension));
    }

    let outcome = tokio::select! {
        result = engine.run(&instruction) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match outcome {
        Some(result) => result,
        None => {
            warn!("Interrupted");
            engine.release();
            LoopResult::stopped(StopReason::Interrupted)
        }
    };

    print_summary(&result);

    if !result.success {
        anyhow::bail!("Loop stopped without success: {}", result.stop_reason);
    }
    Ok(())
}

fn print_summary(result: &LoopResult) {
    println!();
    println!("Loop completed!");
    println!("  Iterations: {}", result.iterations);
    println!("  Attempts evaluated: {}", result.attempts.len());
    println!("  Success: {}", result.success);
    println!("  Stop reason: {}", result.stop_reason);

    let reverted = result.attempts.iter().filter(|a| a.reverted).count();
    if reverted > 0 {
        println!("  Reverted attempts: {}", reverted);
    }

    match &result.final_code {
        Some(code) => {
            println!();
            println!("Applied operations:");
            println!("{}", code);
        }
        None if !result.success => {
            if let Some(last) = result.attempts.last() {
                println!();
                println!("Last attempt ({}):", last.iteration);
                println!("{}", last.code);
                if let Some(error) = &last.execution_error {
                    println!("  Execution error: {}", error);
                }
            }
        }
        None => {}
    }
}

async fn cmd_doctor(explicit: Option<&Path>, check_model: bool) -> Result<()> {
    println!("calcpilot doctor");
    println!("================");

    // Config
    let config = match explicit {
        Some(path) => {
            println!("Config: {}", path.display());
            load_config(Some(path))?
        }
        None => {
            let path = CalcPilotConfig::path_in(&std::env::current_dir()?);
            if path.exists() {
                println!("Config: {}", path.display());
            } else {
                println!("Config: defaults (no {})", path.display());
            }
            load_config(None)?
        }
    };
    println!("  Model: {}/{}", config.model.provider, config.model.name);
    println!(
        "  Session endpoint: {} (calcpilot JSONL bridge, protocol v{})",
        config.session.endpoint, PROTOCOL_VERSION
    );
    println!(
        "  Max iterations: {} (+{} per extension)",
        config.loop_defaults.max_iterations, config.loop_defaults.extension_step
    );

    // Credentials
    let mut healthy = true;
    match config.model.provider {
        Provider::Gemini => match resolve_api_key(&config.model.api_key_env) {
            Ok(_) => println!("Credentials: {} is set", config.model.api_key_env),
            Err(e) => {
                healthy = false;
                println!("Credentials: MISSING ({})", e);
            }
        },
        Provider::Ollama => println!("Credentials: not needed for ollama"),
    }

    // Session
    match BridgeSession::connect(&config.session).await {
        Ok(session) => {
            let info = session.info();
            println!(
                "Session: connected to {} (protocol v{})",
                info.application, info.protocol_version
            );
            match session.current_document().await {
                Ok(doc) if doc.is_spreadsheet => {
                    let sheets = session.sheet_count().await.unwrap_or(0);
                    println!("  Current document: {} ({} sheets)", doc.title, sheets);
                }
                Ok(doc) => {
                    println!("  Current document: {} (not a spreadsheet)", doc.title);
                }
                Err(e) => println!("  Current document: unavailable ({})", e),
            }
        }
        Err(e) => {
            healthy = false;
            println!("Session: UNREACHABLE ({})", e);
            println!();
            println!("{}", manual_start_hint(&config.session.endpoint));
        }
    }

    // Model round trip
    if check_model {
        let backend = build_backend(&config.model)?;
        match backend.generate("Reply with the single word OK.").await {
            Ok(reply) => println!("Model: {} replied {:?}", backend.name(), reply.trim()),
            Err(e) => {
                healthy = false;
                println!("Model: FAILED ({})", e);
            }
        }
    }

    println!();
    if healthy {
        println!("All checks passed");
        Ok(())
    } else {
        anyhow::bail!("Some checks failed")
    }
}

fn cmd_init(path: PathBuf, force: bool) -> Result<()> {
    let config_path = CalcPilotConfig::path_in(&path);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let written = CalcPilotConfig::write_default(&path)
        .with_context(|| format!("Failed to write config under {}", path.display()))?;

    println!("Initialized calcpilot in {:?}", path);
    println!("Created:");
    println!("  {}", written.display());
    println!("\nNext steps:");
    println!("  1. Export your API key (GOOGLE_API_KEY by default)");
    println!("  2. Start the spreadsheet application and focus a spreadsheet document");
    println!(
        "  3. Start the calcpilot bridge (newline-delimited JSON, protocol v{}) on the",
        PROTOCOL_VERSION
    );
    println!("     [session] endpoint; a plain soffice --accept UNO socket will not work");
    println!("  4. Run 'calcpilot doctor' to check the setup");

    Ok(())
}
