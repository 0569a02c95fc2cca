//! # Temperature/Pressure Acquisition Entry Point
//! Runs acquisition sessions against the simulated rig (gateway, trigger box, safety relays).
//!
//! ## Modes
//! - **Triggered:** one row per rising edge of the (simulated) external trigger, until Ctrl-C.
//! - **Free-running:** `sample_count` rows at `acquisition_frequency_hz`, or until Ctrl-C.
//!
//! ## Shutdown
//! Ctrl-C is observed on a watcher thread. The session then stops accepting edges, seals the
//! in-flight capture, writes the CSV and releases the alarm/shutdown outputs.
//!
//! ## Outputs
//! - `data/tp_acquisition.csv` (or `output_path` / `--output`)
//! - `<output>.recovered.csv` when the primary write failed twice

use std::{
    io::{Write, stdin, stdout},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use tp_acquisition::{
    AcqResult, AcquisitionMode, AcquisitionSession, RigConfig, SessionOutcome,
    acquisition::{sensor::SimulatedGateway, trigger::{EdgeSource, PeriodicEdgeSource}},
    safety::{interlock::SimulatedOutputs, monitor::TerminalDisplay},
};

const DEFAULT_CONFIG_PATH: &str = "config/rig.toml";
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Triggered,
    FreeRunning,
}

impl From<ModeArg> for AcquisitionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Triggered => AcquisitionMode::Triggered,
            ModeArg::FreeRunning => AcquisitionMode::FreeRunning,
        }
    }
}

#[derive(Parser)]
#[command(name = "tp_acquisition")]
#[command(about = "Temperature/pressure acquisition with pressure interlock", long_about = None)]
struct Cli {
    /// Rig configuration (TOML). Defaults to config/rig.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Acquisition mode; without it an interactive menu is shown.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// CSV output path override.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Render the 20x4 LCD frame instead of the single status line.
    #[arg(long)]
    lcd: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(output) = cli.output {
        config.output_path = output;
    }

    let abort = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_watcher(abort.clone());
    info!("=== TP ACQUISITION START ===");

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
        return exit_code(run_session(config, cli.lcd, &abort));
    }

    loop {
        let input = prompt_menu();
        // Ctrl-C at the menu cannot interrupt read_line; it is honoured once the line returns
        let aborted = abort.swap(false, Ordering::AcqRel);
        match menu_choice(&input, aborted) {
            MenuChoice::Triggered => config.mode = AcquisitionMode::Triggered,
            MenuChoice::FreeRunning => {
                config.mode = AcquisitionMode::FreeRunning;
                config.sample_count = prompt_sample_count(config.sample_count);
            }
            MenuChoice::Exit => {
                println!("Exiting. Goodbye!");
                info!("=== TP ACQUISITION FINISHED ===");
                return ExitCode::SUCCESS;
            }
            MenuChoice::Unrecognized => {
                println!("Unrecognized option '{}', please try again.", input);
                continue;
            }
        }
        let ok = run_session(config.clone(), cli.lcd, &abort);
        // the Ctrl-C that ended the session must not also close the menu
        abort.store(false, Ordering::Release);
        if !ok {
            return ExitCode::FAILURE;
        }
        println!("\n Session completed. Returning to menu...\n");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Triggered,
    FreeRunning,
    Exit,
    Unrecognized,
}

/// A Ctrl-C received while the menu was waiting means exit, whatever was typed.
fn menu_choice(input: &str, aborted: bool) -> MenuChoice {
    if aborted {
        return MenuChoice::Exit;
    }
    match input {
        "1" | "" => MenuChoice::Triggered,
        "2" => MenuChoice::FreeRunning,
        "3" => MenuChoice::Exit,
        _ => MenuChoice::Unrecognized,
    }
}

fn load_config(path: Option<&Path>) -> AcqResult<RigConfig> {
    match path {
        Some(p) => RigConfig::load(p),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => RigConfig::load(Path::new(DEFAULT_CONFIG_PATH)),
        None => {
            warn!("no {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Ok(RigConfig::default())
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT ACQUISITION MODE                 │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Triggered (external sync edges)         │");
    println!("│  2) Free-running (fixed sample count)       │");
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1, Ctrl-C then Enter exits): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_sample_count(default: u64) -> u64 {
    print!("Number of measures [default: {}]: ", default);
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().parse::<u64>().unwrap_or(default)
}

/// Sets `abort` on every Ctrl-C. The flag is re-armed by the caller between sessions.
fn spawn_ctrl_c_watcher(abort: Arc<AtomicBool>) {
    let spawned = thread::Builder::new().name("ctrl-c".into()).spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("failed to create signal runtime: {}", e);
                return;
            }
        };
        rt.block_on(async {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for Ctrl-C: {}", e);
                    return;
                }
                warn!("Ctrl-C received, stopping acquisition");
                abort.store(true, Ordering::Release);
            }
        });
    });
    if let Err(e) = spawned {
        error!("failed to spawn Ctrl-C watcher: {}", e);
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Runs one session to completion or abort. False if it failed to start, hit a fatal error, or lost data.
fn run_session(config: RigConfig, lcd: bool, abort: &AtomicBool) -> bool {
    let sim = config.simulation.clone();
    let gateway = Arc::new(SimulatedGateway::new(sim.pressure_volts, sim.fault_probability));
    let outputs = Arc::new(SimulatedOutputs::new());
    let edge_source: Option<Box<dyn EdgeSource>> = match config.mode {
        AcquisitionMode::Triggered => Some(Box::new(PeriodicEdgeSource::new(Duration::from_millis(
            sim.trigger_period_ms,
        )))),
        AcquisitionMode::FreeRunning => None,
    };

    let session = match AcquisitionSession::start(
        config,
        gateway,
        outputs,
        edge_source,
        Box::new(TerminalDisplay::new(lcd)),
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("session did not start: {}", e);
            return false;
        }
    };
    println!("Acquiring in {} mode, press Ctrl-C to stop.", session.config().mode.name());

    while !abort.load(Ordering::Acquire) && !session.is_finished() {
        thread::sleep(WAIT_POLL);
    }
    println!();
    report(session.stop())
}

fn report(outcome: SessionOutcome) -> bool {
    let mut ok = true;

    match outcome.persisted {
        Ok(report) => println!("{} row(s) saved to {}", report.rows, report.path.display()),
        Err(failure) => {
            let fallback = failure.path.with_extension("recovered.csv");
            match failure.recover_to(&fallback) {
                Ok(report) => println!(
                    "primary write failed; {} row(s) recovered to {}",
                    report.rows,
                    report.path.display()
                ),
                Err(last) => {
                    error!("{} row(s) could not be saved: {}", last.log.len(), last);
                    ok = false;
                }
            }
        }
    }

    if let Some(e) = outcome.fatal {
        println!("Session ended on error: {}", e);
        ok = false;
    }
    println!(
        "Triggers: {} received, {} missed. Interlock final state: {:?}",
        outcome.metrics.triggers_received,
        outcome.metrics.triggers_missed,
        outcome.final_interlock.state()
    );
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_maps_input_to_modes() {
        assert_eq!(menu_choice("", false), MenuChoice::Triggered);
        assert_eq!(menu_choice("1", false), MenuChoice::Triggered);
        assert_eq!(menu_choice("2", false), MenuChoice::FreeRunning);
        assert_eq!(menu_choice("3", false), MenuChoice::Exit);
        assert_eq!(menu_choice("9", false), MenuChoice::Unrecognized);
    }

    #[test]
    fn ctrl_c_at_the_menu_exits() {
        assert_eq!(menu_choice("", true), MenuChoice::Exit);
        assert_eq!(menu_choice("2", true), MenuChoice::Exit);
    }
}
