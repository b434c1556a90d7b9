//! AutoWater command line tool
//!
//! Drives the sync core against an in-process simulated controller:
//!
//!   autowater status
//!   autowater water 1
//!   autowater schedule 3 --every 2 --unit hours --duration 10
//!   autowater --drop-first 1 mode auto
//!   autowater demo

use anyhow::Result;
use autowater_cli::{Faults, Session, Settings};
use autowater_sync::ConnectionState;
use autowater_types::{IntervalUnit, PlantId, ScheduleEdit};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "autowater")]
#[command(about = "Keep an AutoWater irrigation controller in sync")]
struct Args {
    /// Path to a TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Lose this many outbound frames before the controller sees them
    #[arg(long, default_value_t = 0)]
    drop_first: u32,

    /// Controller applies commands but never acknowledges
    #[arg(long)]
    silent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show plants, schedules and mode
    Status,
    /// Water a plant now
    Water { plant: PlantId },
    /// Switch between automatic and manual mode
    Mode { mode: Mode },
    /// Change a plant's schedule
    Schedule {
        plant: PlantId,
        /// Interval value (1-30)
        #[arg(long)]
        every: Option<u32>,
        /// Interval unit
        #[arg(long)]
        unit: Option<IntervalUnit>,
        /// Watering duration in seconds (1-60)
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Run a scripted session exercising every command
    Demo,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Auto,
    Manual,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = Settings::load(args.config.as_deref())?;
    let faults = Faults {
        drop_first: args.drop_first,
        silent: args.silent,
    };
    let session = Session::start(&settings, faults).await?;

    let result = run(&session, args.command).await;
    session.shutdown().await;
    result
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Status => print!("{}", session.status().await),
        Command::Water { plant } => {
            session.water(plant).await?;
            println!("Watered plant {plant}");
        }
        Command::Mode { mode } => {
            session.set_mode(matches!(mode, Mode::Auto)).await?;
            println!("Mode set to {mode:?}");
        }
        Command::Schedule {
            plant,
            every,
            unit,
            duration,
        } => {
            let mut edit = ScheduleEdit::new();
            if let Some(every) = every {
                edit = edit.interval_value(every);
            }
            if let Some(unit) = unit {
                edit = edit.interval_unit(unit);
            }
            if let Some(duration) = duration {
                edit = edit.duration(duration);
            }
            let confirmed = session.schedule(plant, edit).await?;
            println!("Plant {plant} now waters {confirmed}");
        }
        Command::Demo => demo(session).await?,
    }
    Ok(())
}

async fn demo(session: &Session) -> Result<()> {
    println!("\n== Initial state ==");
    print!("{}", session.status().await);

    println!("\n== Water Rose ==");
    session.water(PlantId::new(1)).await?;

    println!("\n== Sunflower every 2 hours for 10s ==");
    let edit = ScheduleEdit::new()
        .interval(2, IntervalUnit::Hours)
        .duration(10);
    session.schedule(PlantId::new(3), edit).await?;

    println!("\n== Invalid edit is rejected locally ==");
    if let Err(e) = session
        .schedule(PlantId::new(3), ScheduleEdit::new().duration(0))
        .await
    {
        println!("{e:#}");
    }

    println!("\n== Automatic mode ==");
    session.set_mode(true).await?;
    print!("{}", session.status().await);

    println!("\n== Link loss ==");
    session.controller().drop_link().await;
    let mut states = session.link().watch_state();
    states
        .wait_for(|s| *s != ConnectionState::Connected)
        .await?;
    let edit = ScheduleEdit::new().duration(12);
    match session.schedule(PlantId::new(2), edit).await {
        Ok(_) => warn!("Edit went through while the link was down"),
        Err(e) => println!("{e:#}"),
    }
    print!("{}", session.status().await);

    println!("\n== Reconnect ==");
    session.connect().await?;
    if let Some(confirmed) = session.resubmit(PlantId::new(2)).await? {
        info!("Kept edit for plant 2 confirmed: {}", confirmed);
    }
    print!("{}", session.status().await);
    Ok(())
}
