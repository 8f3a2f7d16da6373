//! Real signal delivery. Signal handlers are process-wide, so this file
//! holds a single test.

use nix::sys::signal::{raise, Signal};
use service_supervisor::config::Parser;
use service_supervisor::registry::RoughState;
use service_supervisor::supervisor::{BootOptions, Supervisor, SystemState};

const CONFIG: &str = r#"
settings:
  runlevel: default
  shutdown_action: exit
services:
  default:
    type: runlevel
    need: [net, syslog]
  net:
    type: virtual
  syslog:
    type: service
    need: [net]
"#;

#[test]
fn test_sigterm_runs_shutdown_action() {
    let config = Parser::new().parse_config(CONFIG).unwrap();
    let mut sv = Supervisor::builder()
        .config(config)
        .builtin_modules(true)
        .build()
        .unwrap();
    sv.install_signal_handlers().unwrap();
    sv.boot(&BootOptions::default()).unwrap();
    for _ in 0..10 {
        sv.poll_once();
    }
    assert_eq!(sv.system_state(), SystemState::Up);

    // A status dump must not disturb anything.
    raise(Signal::SIGUSR1).unwrap();
    sv.poll_once();
    assert_eq!(sv.system_state(), SystemState::Up);

    raise(Signal::SIGTERM).unwrap();
    assert_eq!(sv.run(), SystemState::Exit);

    for name in ["default", "net", "syslog"] {
        let rough = sv.find(name).and_then(|id| sv.service(id)).map(|s| s.rough());
        assert_eq!(rough, Some(RoughState::Down), "{} should be down", name);
    }
}
