//! A supervisor hands its running state to a freshly started one through
//! the snapshot file, the way the binary does across `execv`.

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use service_supervisor::config::{Config, Parser};
use service_supervisor::modules::daemon::{DAEMON_PROCESS, DAEMON_RUNNING, DAEMON_TYPE};
use service_supervisor::registry::{DataStore, RoughState, Service};
use service_supervisor::supervisor::{signals, BootOptions, Supervisor, SystemState};
use service_supervisor::Snapshot;

const CONFIG: &str = r#"
settings:
  runlevel: default
  shutdown_action: exit
services:
  default:
    type: runlevel
    need: [net]
  net:
    type: virtual
"#;

fn config(dump: &std::path::Path) -> Config {
    let mut config = Parser::new().parse_config(CONFIG).unwrap();
    config.settings.dump_path = dump.to_path_buf();
    config
}

fn build(config: Config) -> Supervisor {
    Supervisor::builder()
        .config(config)
        .builtin_modules(true)
        .build()
        .unwrap()
}

#[test]
fn test_sighup_hands_state_to_new_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("state.json");

    let mut old = build(config(&dump));
    old.boot(&BootOptions::default()).unwrap();
    for _ in 0..10 {
        old.poll_once();
    }
    assert_eq!(old.system_state(), SystemState::Up);

    // A daemon that is already running, adopted from some earlier life.
    let mut data = DataStore::new();
    data.set_text("daemon", "/usr/sbin/sshd -D");
    let sshd = old
        .admit(
            Service::new("sshd")
                .with_type(&DAEMON_TYPE)
                .with_data(data)
                .with_state(&DAEMON_RUNNING),
        )
        .unwrap();
    old.attach_process(sshd, &DAEMON_PROCESS, Pid::from_raw(4_100_000))
        .unwrap();

    signals::mark_pending(Signal::SIGHUP);
    assert_eq!(old.run(), SystemState::Execve);
    old.snapshot().write(&dump).unwrap();

    let written = Snapshot::read(&dump).unwrap();
    assert_eq!(written.runlevel, "default");
    assert_eq!(written.services.len(), 3);

    let mut new = build(config(&dump));
    new.boot(&BootOptions::parse(["hot_reload"])).unwrap();
    assert_eq!(new.system_state(), SystemState::Up);
    assert!(!dump.exists(), "snapshot is consumed");

    for name in ["default", "net", "sshd"] {
        let rough = new.find(name).and_then(|id| new.service(id)).map(|s| s.rough());
        assert_eq!(rough, Some(RoughState::Up), "{} should be up", name);
    }
    let sshd = new.find("sshd").unwrap();
    assert_eq!(new.state_of(sshd), Some(&DAEMON_RUNNING));
    let process = new.service(sshd).unwrap().process_of_kind(&DAEMON_PROCESS).unwrap();
    assert_eq!(process.pid(), Some(Pid::from_raw(4_100_000)));
    assert_eq!(
        new.service(sshd).unwrap().data().text("daemon"),
        Some("/usr/sbin/sshd -D")
    );

    new.poll_once();
    assert_eq!(new.system_state(), SystemState::Up);
}

#[test]
fn test_hot_reload_without_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut sv = build(config(&dir.path().join("missing.json")));
    assert!(sv.boot(&BootOptions::parse(["hot_reload"])).is_err());
}
