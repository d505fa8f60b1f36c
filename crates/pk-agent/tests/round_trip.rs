use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pk_agent::*;
use pk_core::config::{AgentConfig, MailboxConfig};
use pk_core::emulator::RamEmulator;
use pk_core::{
    BridgeConfig, Button, EmulatorDriver, FileMailbox, Joypad, Mailbox, Mailboxes, MemoryWrite,
};

/// Runs the emulator loop on its own thread until dropped.
struct Bridge {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<RamEmulator>>,
}

impl Bridge {
    fn spawn(emu: RamEmulator, config: &BridgeConfig, mailboxes: Mailboxes) -> Self {
        let mut driver = EmulatorDriver::new(emu, config, mailboxes).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            driver.run_until(|_| {
                thread::sleep(Duration::from_micros(200));
                flag.load(Ordering::Relaxed)
            });
            driver.into_emulator()
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    fn finish(mut self) -> RamEmulator {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.take().unwrap().join().unwrap()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn quick_wait() -> ResetWait {
    ResetWait {
        attempts: 3,
        settle: Duration::from_millis(5),
        polls: 400,
        poll_interval: Duration::from_millis(2),
    }
}

fn wait_for_snapshot(client: &mut BridgeClient) {
    for _ in 0..1000 {
        if client.latest_snapshot().is_some() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("bridge never published a snapshot");
}

#[test]
fn test_reset_and_wait_against_running_bridge() {
    let mut emu = RamEmulator::new();
    // Checkpoint: one starter, nothing else
    emu.write_u8(0xD162, 1);
    emu.save_state(1).unwrap();
    // Current run: three party members and two badges
    emu.write_u8(0xD162, 3);
    emu.write_u8(0xD355, 0b11);

    let config = BridgeConfig::default();
    let (bridge_side, handles) = Mailboxes::in_memory();
    let bridge = Bridge::spawn(emu, &config, bridge_side);

    let mut client = BridgeClient::new(handles.to_mailboxes(), &config.agent);
    wait_for_snapshot(&mut client);
    assert_eq!(client.latest_snapshot().map(|s| s.party_count), Some(3));

    let fresh = client.reset_and_wait(1, &quick_wait()).unwrap();
    assert_eq!(fresh.party_count, 1);
    assert_eq!(fresh.badges, 0);

    let emu = bridge.finish();
    assert_eq!(emu.ram()[0xD162], 1);
}

/// Poll `done` until it holds, failing the test after a generous bound.
fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if done() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn test_agent_loop_presses_reach_emulator() {
    let dir = tempfile::tempdir().unwrap();
    let config = BridgeConfig {
        mailbox: MailboxConfig::in_directory(dir.path()),
        ..BridgeConfig::default()
    };
    let bridge = Bridge::spawn(
        RamEmulator::new(),
        &config,
        Mailboxes::from_config(&config.mailbox).unwrap(),
    );
    let action = FileMailbox::new(config.mailbox.action_path());

    let mut client = BridgeClient::new(Mailboxes::from_config(&config.mailbox).unwrap(), &config.agent);
    wait_for_snapshot(&mut client);

    let script = ScriptedPolicy::new(vec![
        Decision::Press { button: Button::Start, frames: Some(3) },
        Decision::Press { button: Button::Down, frames: None },
    ]);
    let mut agent = AgentLoop::new(client, script, &config.agent);

    // The bridge clears the document only after the hold has run
    for _ in 0..2 {
        let report = agent.step().unwrap();
        assert!(report.submitted.is_some());
        wait_until("the bridge to consume the press", || {
            matches!(action.read(), Ok(None))
        });
    }
    assert_eq!(agent.stats().presses, 2);

    let emu = bridge.finish();
    assert_eq!(emu.frames_held(Joypad::START), 3);
    assert_eq!(emu.frames_held(Joypad::DOWN), 4);
}

#[test]
fn test_stopped_bridge_reported_stale() {
    let config = BridgeConfig {
        agent: AgentConfig {
            stale_after_ms: 20,
            ..AgentConfig::default()
        },
        ..BridgeConfig::default()
    };
    let (bridge_side, handles) = Mailboxes::in_memory();
    let mut driver = EmulatorDriver::new(RamEmulator::new(), &config, bridge_side).unwrap();
    driver.tick();

    let client = BridgeClient::new(handles.to_mailboxes(), &config.agent);
    let mut agent = AgentLoop::new(client, RandomPolicy::new(1), &config.agent);

    let first = agent.step().unwrap();
    assert_eq!(first.freshness, Freshness::Waiting);
    assert!(first.submitted.is_some());

    thread::sleep(Duration::from_millis(40));
    let second = agent.step().unwrap();
    assert!(second.freshness.is_stalled());
    assert_eq!(second.decision, Decision::Wait);
    assert!(second.submitted.is_none());
    assert_eq!(agent.stats().stalled_steps, 1);
}
