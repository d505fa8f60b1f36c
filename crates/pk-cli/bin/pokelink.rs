//! pokelink: operator CLI for the emulator bridge
//!
//! Talks to a running bridge through the mailbox directory, or runs the
//! emulator side itself over a RAM dump.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use pk_agent::{AgentLoop, BridgeClient, Freshness, RandomPolicy, ResetWait, StaleDetector};
use pk_core::emulator::RamEmulator;
use pk_core::logging::{directive_for_verbosity, init_logging};
use pk_core::{BridgeConfig, Button, EmulatorDriver, Mailboxes};
use pk_cli::{party_lines, summarize};

/// Bridge between a Game Boy emulator and a game-playing agent
#[derive(Parser, Debug)]
#[command(name = "pokelink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $POKELINK_CONFIG, then ./pokelink.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Press a button (A, B, START, SELECT, UP, DOWN, LEFT, RIGHT)
    Send {
        #[arg(value_parser = parse_button)]
        button: Button,

        /// Frames to hold (default: agent.frames_per_action)
        #[arg(short, long)]
        frames: Option<u32>,
    },

    /// Load a save state
    Reset {
        /// Save slot (default: agent.save_slot)
        #[arg(short, long)]
        slot: Option<u8>,

        /// Block until the game looks like a fresh start
        #[arg(short, long)]
        wait: bool,
    },

    /// Overwrite the first party member
    SetStarter {
        /// Internal species index
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..))]
        species: u8,

        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        level: u8,
    },

    /// Print snapshots as they change
    Watch {
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Stale threshold (default: agent.stale_after_ms)
        #[arg(long)]
        stale_ms: Option<u64>,

        /// Stop after this many lines
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Also list the party
        #[arg(short, long)]
        party: bool,
    },

    /// Run the emulator side over a RAM dump (64 KiB or 8 KiB WRAM)
    Replay {
        dump: PathBuf,

        /// Frames to run; runs until interrupted when omitted
        #[arg(short, long)]
        frames: Option<u64>,

        /// Press A on new text boxes
        #[arg(long)]
        auto_advance: bool,
    },

    /// Drive a running bridge with the random policy
    Run {
        #[arg(short, long, default_value_t = 100)]
        steps: u64,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Reset to the checkpoint before the first step
        #[arg(long)]
        reset_first: bool,
    },
}

fn parse_button(s: &str) -> Result<Button, String> {
    Button::from_str(s).map_err(|_| format!("unknown button `{s}`"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(directive_for_verbosity(args.verbose)).context("failed to initialise logging")?;

    let config = BridgeConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Cmd::Send { button, frames } => {
            let client = client(&config)?;
            let frames = frames.unwrap_or(config.agent.frames_per_action);
            if frames == 0 {
                bail!("--frames must be positive");
            }
            let id = client.press_for(button, frames)?;
            println!("{id}");
        }
        Cmd::Reset { slot, wait } => {
            let mut client = client(&config)?;
            let slot = slot.unwrap_or(config.agent.save_slot);
            if wait {
                let snapshot = client.reset_and_wait(slot, &ResetWait::default())?;
                println!("{}", summarize(&snapshot));
            } else {
                println!("{}", client.request_reset(slot)?);
            }
        }
        Cmd::SetStarter { species, level } => {
            let client = client(&config)?;
            println!("{}", client.set_starter(species, level)?);
        }
        Cmd::Watch {
            interval_ms,
            stale_ms,
            count,
            party,
        } => watch(&config, interval_ms, stale_ms, count, party)?,
        Cmd::Replay {
            dump,
            frames,
            auto_advance,
        } => replay(config, &dump, frames, auto_advance)?,
        Cmd::Run {
            steps,
            seed,
            reset_first,
        } => {
            let mut client = client(&config)?;
            if reset_first {
                client.reset_and_wait(config.agent.save_slot, &ResetWait::default())?;
            }
            let mut agent = AgentLoop::new(client, RandomPolicy::new(seed), &config.agent);
            let stats = agent.run(steps)?;
            println!(
                "steps {}  presses {}  resets {}  failed resets {}  failed submits {}  stalled {}",
                stats.steps,
                stats.presses,
                stats.resets,
                stats.failed_resets,
                stats.failed_submits,
                stats.stalled_steps
            );
        }
    }
    Ok(())
}

fn client(config: &BridgeConfig) -> Result<BridgeClient> {
    let mailboxes = Mailboxes::from_config(&config.mailbox).with_context(|| {
        format!("failed to open mailbox directory {}", config.mailbox.directory.display())
    })?;
    Ok(BridgeClient::new(mailboxes, &config.agent))
}

fn watch(
    config: &BridgeConfig,
    interval_ms: u64,
    stale_ms: Option<u64>,
    count: Option<u64>,
    party: bool,
) -> Result<()> {
    let mut client = client(config)?;
    let threshold = Duration::from_millis(stale_ms.unwrap_or(config.agent.stale_after_ms));
    let mut detector = StaleDetector::new(threshold);
    let mut last_frame = None;
    let mut printed = 0;

    loop {
        if let Some(snapshot) = client.latest_snapshot() {
            let freshness = detector.observe_now(snapshot.frame);
            if last_frame != Some(snapshot.frame) {
                println!("{}", summarize(&snapshot));
                if party {
                    for line in party_lines(&snapshot) {
                        println!("{line}");
                    }
                }
                last_frame = Some(snapshot.frame);
                printed += 1;
            } else if let Freshness::Stalled { frame, elapsed } = freshness {
                println!("stale: frame {frame} unchanged for {:.1}s", elapsed.as_secs_f64());
            }
        }
        if count.is_some_and(|n| printed >= n) {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
}

fn replay(
    mut config: BridgeConfig,
    dump: &Path,
    frames: Option<u64>,
    auto_advance: bool,
) -> Result<()> {
    let bytes = std::fs::read(dump).with_context(|| format!("failed to read {}", dump.display()))?;
    let mut emu = RamEmulator::from_dump(&bytes)?;
    // Resets during replay return to the dump
    emu.save_state(config.agent.save_slot)?;

    config.emulator.auto_advance |= auto_advance;
    let mailboxes = Mailboxes::from_config(&config.mailbox).with_context(|| {
        format!("failed to open mailbox directory {}", config.mailbox.directory.display())
    })?;
    let mut driver = EmulatorDriver::new(emu, &config, mailboxes)?;
    info!(dump = %dump.display(), "replaying memory dump");

    match frames {
        Some(0) => {}
        Some(limit) => {
            driver.run_until(|report| report.frame + report.frames_advanced >= limit);
        }
        None => loop {
            driver.tick();
            // Roughly real time
            thread::sleep(Duration::from_micros(16_743));
        },
    }

    if let Some(snapshot) = driver.latest() {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    }
    Ok(())
}
