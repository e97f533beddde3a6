//! CLI tool for the 5-axis gantry.
//!
//! Subcommands:
//! - `query`: Read the current position and limit switches
//! - `home`: Drive x/y/z into their reverse limits and zero them
//! - `move`: Absolute move in mm / degrees
//! - `move-rel`: Relative move in raw steps
//! - `move-rel-mm`: Relative move in mm / degrees
//! - `repl`: Send raw DMC commands

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rig_hardware::galil::DmcLink;
use rig_hardware::gantry::{
    units, Axis, AxisSpeeds, AxisTargets, GantryArgs, PhysicalPosition, StepPosition,
};
use serde::Serialize;
use tracing::info;

/// Galil DMC gantry control tool
#[derive(Parser, Debug)]
#[command(name = "gantry_tool")]
#[command(about = "Control tool for the 5-axis Galil DMC gantry")]
#[command(version)]
struct Args {
    #[command(flatten)]
    gantry: GantryArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query current position and reverse limit switches
    Query {
        /// Print the position as JSON
        #[arg(long)]
        json: bool,
    },

    /// Home x, y and z against their reverse limit switches
    Home,

    /// Move to an absolute position (mm for x/y/z, degrees for theta/phi)
    Move {
        #[arg(short, long, allow_hyphen_values = true)]
        x: Option<f64>,
        #[arg(short, long, allow_hyphen_values = true)]
        y: Option<f64>,
        #[arg(short, long, allow_hyphen_values = true)]
        z: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        theta: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        phi: Option<f64>,

        /// Speed for every axis, steps per second
        #[arg(short, long)]
        speed: Option<f64>,
    },

    /// Move by a relative distance in steps
    MoveRel {
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        x: i64,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        y: i64,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        z: i64,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        theta: i64,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        phi: i64,

        /// Speed for every axis, steps per second
        #[arg(short, long)]
        speed: Option<f64>,
    },

    /// Move by a relative distance in mm / degrees
    MoveRelMm {
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        x: f64,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        y: f64,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        z: f64,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        theta: f64,
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        phi: f64,

        /// Speed for every axis, steps per second
        #[arg(short, long)]
        speed: Option<f64>,
    },

    /// Interactive DMC command REPL
    Repl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Query { json } => cmd_query(&args.gantry, json),
        Command::Home => cmd_home(&args.gantry),
        Command::Move {
            x,
            y,
            z,
            theta,
            phi,
            speed,
        } => cmd_move(&args.gantry, AxisTargets::new(x, y, z, theta, phi), speed),
        Command::MoveRel {
            x,
            y,
            z,
            theta,
            phi,
            speed,
        } => cmd_move_rel(&args.gantry, StepPosition::new(x, y, z, theta, phi), speed),
        Command::MoveRelMm {
            x,
            y,
            z,
            theta,
            phi,
            speed,
        } => cmd_move_rel_mm(
            &args.gantry,
            PhysicalPosition::new(x, y, z, theta, phi),
            speed,
        ),
        Command::Repl => cmd_repl(&args.gantry),
    }
}

fn speeds(speed: Option<f64>) -> Result<Option<AxisSpeeds>> {
    match speed {
        Some(s) if !(s.is_finite() && s > 0.0) => bail!("Speed must be positive, got {s}"),
        Some(s) => Ok(Some(AxisSpeeds::splat(s))),
        None => Ok(None),
    }
}

fn log_position(label: &str, steps: StepPosition) {
    let physical = units::to_physical(steps);
    info!("{} {}", label, steps);
    for (axis, value) in physical.iter() {
        info!(
            "  {:>5}: {:>10.3} {} ({} steps)",
            axis,
            value,
            axis.unit(),
            steps.get(axis)
        );
    }
}

// ==================== Query Command ====================

#[derive(Serialize)]
struct PositionReport {
    steps: StepPosition,
    physical: PhysicalPosition,
    reverse_limits: Vec<(String, bool)>,
}

fn cmd_query(gantry_args: &GantryArgs, json: bool) -> Result<()> {
    let mut gantry = gantry_args.connect()?;

    let steps = gantry.query_position()?;
    let mut reverse_limits = Vec::new();
    for axis in Axis::LINEAR {
        reverse_limits.push((axis.to_string(), gantry.reverse_limit_engaged(axis)?));
    }

    if json {
        let report = PositionReport {
            steps,
            physical: units::to_physical(steps),
            reverse_limits,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    log_position("Position", steps);
    for (axis, engaged) in &reverse_limits {
        info!("Reverse limit {}: {}", axis, if *engaged { "engaged" } else { "open" });
    }
    Ok(())
}

// ==================== Motion Commands ====================

fn cmd_home(gantry_args: &GantryArgs) -> Result<()> {
    let mut gantry = gantry_args.connect()?;
    let position = gantry.home().context("Homing failed")?;
    log_position("Homed at", position);
    Ok(())
}

fn cmd_move(gantry_args: &GantryArgs, targets: AxisTargets, speed: Option<f64>) -> Result<()> {
    if targets.iter().all(|(_, t)| t.is_none()) {
        bail!("Nothing to move: give at least one of --x, --y, --z, --theta, --phi");
    }
    let speeds = speeds(speed)?;

    let mut gantry = gantry_args.connect()?;
    let position = gantry
        .move_absolute(targets, speeds)
        .context("Absolute move failed")?;
    log_position("Moved to", position);
    Ok(())
}

fn cmd_move_rel(gantry_args: &GantryArgs, delta: StepPosition, speed: Option<f64>) -> Result<()> {
    if delta.is_zero() {
        bail!("Nothing to move: every axis delta is zero");
    }
    let speeds = speeds(speed)?;

    let mut gantry = gantry_args.connect()?;
    let position = gantry
        .move_relative(delta, speeds)
        .context("Relative move failed")?;
    log_position("Moved to", position);
    Ok(())
}

fn cmd_move_rel_mm(
    gantry_args: &GantryArgs,
    delta: PhysicalPosition,
    speed: Option<f64>,
) -> Result<()> {
    let speeds = speeds(speed)?;

    let mut gantry = gantry_args.connect()?;
    let position = gantry
        .move_relative_physical(delta, speeds)
        .context("Relative move failed")?;
    log_position("Moved to", position);
    Ok(())
}

// ==================== REPL Command ====================

fn cmd_repl(gantry_args: &GantryArgs) -> Result<()> {
    let mut dmc = gantry_args.device()?;

    println!("Connected.");
    println!();
    println!("DMC REPL - Enter commands, 'quit' to exit");
    println!("Examples: PA ?,?,?,?,?, MG _BGA, MG _LRA, TC1");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let cmd = input.trim();
        if cmd.is_empty() {
            continue;
        }

        if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
            println!("Bye!");
            break;
        }

        match dmc.command(cmd) {
            Ok(response) if response.is_empty() => println!("OK"),
            Ok(response) => {
                for line in response.lines() {
                    println!("{line}");
                }
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}
