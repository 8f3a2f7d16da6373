//! End-to-end scheduling through the built-in modules, driven by YAML
//! configurations. No processes are forked: the services used here are
//! `virtual` groups and `service` types without commands.

use service_supervisor::config::Parser;
use service_supervisor::event::{HookResult, Payload, IS_CHANGE};
use service_supervisor::registry::RoughState;
use service_supervisor::supervisor::{BootOptions, Supervisor, SystemState};
use std::cell::RefCell;
use std::rc::Rc;

fn build(yaml: &str) -> Supervisor {
    let config = Parser::new().parse_config(yaml).expect("valid config");
    Supervisor::builder()
        .config(config)
        .builtin_modules(true)
        .build()
        .expect("supervisor builds")
}

/// Records every rough-state change as "name:rough".
fn record_changes(sv: &mut Supervisor) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    sv.events()
        .register_hook(&IS_CHANGE, "test", move |sv, event| {
            if let Payload::Service(id) = event.payload {
                if let Some(service) = sv.service(id) {
                    sink.borrow_mut()
                        .push(format!("{}:{}", service.name(), service.rough()));
                }
            }
            HookResult::NotApplicable
        })
        .unwrap();
    log
}

fn rough(sv: &Supervisor, name: &str) -> Option<RoughState> {
    sv.find(name).and_then(|id| sv.service(id)).map(|s| s.rough())
}

fn settle(sv: &mut Supervisor) {
    for _ in 0..10 {
        sv.poll_once();
    }
}

const CHAIN: &str = r#"
settings:
  runlevel: default
  shutdown_action: exit
services:
  default:
    type: runlevel
    need: [a]
  a:
    type: service
    need: [b]
  b:
    type: service
    need: [c]
  c:
    type: service
"#;

#[test]
fn test_chain_starts_in_dependency_order() {
    let mut sv = build(CHAIN);
    let log = record_changes(&mut sv);
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);

    for name in ["default", "a", "b", "c"] {
        assert_eq!(rough(&sv, name), Some(RoughState::Up), "{} should be up", name);
    }
    assert_eq!(sv.system_state(), SystemState::Up);

    let ups: Vec<String> = log
        .borrow()
        .iter()
        .filter(|entry| entry.ends_with(":up"))
        .cloned()
        .collect();
    assert_eq!(ups, vec!["c:up", "b:up", "a:up", "default:up"]);
}

#[test]
fn test_stopping_a_dependency_stops_dependents_first() {
    let mut sv = build(CHAIN);
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);
    let log = record_changes(&mut sv);

    let c = sv.find("c").unwrap();
    sv.stop_service(c).unwrap();
    settle(&mut sv);

    let downs: Vec<String> = log
        .borrow()
        .iter()
        .filter(|entry| entry.ends_with(":down"))
        .cloned()
        .collect();
    assert_eq!(downs, vec!["default:down", "a:down", "b:down", "c:down"]);
}

#[test]
fn test_shutdown_reaches_configured_action() {
    let mut sv = build(CHAIN);
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);

    sv.shutdown(SystemState::Exit);
    assert_eq!(sv.run(), SystemState::Exit);
    for name in ["default", "a", "b", "c"] {
        assert_eq!(rough(&sv, name), Some(RoughState::Down));
    }
}

#[test]
fn test_missing_required_dependency_fails_the_service() {
    let mut sv = build(
        r#"
services:
  default:
    type: runlevel
  net/eth0:
    type: service
    require: [daemon/syslog]
"#,
    );
    sv.boot(&BootOptions::parse(["+net/eth0"])).unwrap();
    settle(&mut sv);

    let eth0 = sv.find("net/eth0").unwrap();
    assert_eq!(
        sv.state_of(eth0).map(|s| s.name),
        Some("RequiredDependencyNotFound")
    );
    assert_eq!(rough(&sv, "net/eth0"), Some(RoughState::Failed));
    assert_eq!(rough(&sv, "default"), Some(RoughState::Up));
}

#[test]
fn test_missing_need_keeps_waiting_until_it_appears() {
    let mut sv = build(
        r#"
services:
  default:
    type: runlevel
    need: [web]
  web:
    type: service
    need: [db]
"#,
    );
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);
    assert_eq!(rough(&sv, "web"), Some(RoughState::Starting));
    assert_eq!(sv.system_state(), SystemState::Starting);
}

#[test]
fn test_template_dependency_resolves_per_instance() {
    let mut sv = build(
        r#"
services:
  default:
    type: runlevel
    need: [net/eth0]
  net/eth0:
    type: service
    need: [ifup/$NAME]
  ifup/eth0:
    type: service
"#,
    );
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);
    assert_eq!(rough(&sv, "ifup/eth0"), Some(RoughState::Up));
    assert_eq!(rough(&sv, "net/eth0"), Some(RoughState::Up));
}

#[test]
fn test_cycle_is_refused_at_load_time() {
    let mut sv = build(
        r#"
services:
  a:
    type: service
    need: [b]
  b:
    type: service
    need: [a]
"#,
    );
    let a = sv.load_service("a").unwrap();
    assert!(sv.load_service("b").is_err());
    assert!(sv.find("b").is_none());
    assert!(sv.service(a).is_some());
}

#[test]
fn test_blacklisted_boot_argument_is_never_loaded() {
    let mut sv = build(CHAIN);
    sv.boot(&BootOptions::parse(["-c"])).unwrap();
    settle(&mut sv);
    assert!(sv.find("c").is_none());
    assert_eq!(rough(&sv, "b"), Some(RoughState::Starting));
}

#[test]
fn test_boot_without_runlevel_definition_fails() {
    let mut sv = build("services: {}\n");
    assert!(sv.boot(&BootOptions::default()).is_err());
}

#[test]
fn test_restart_brings_service_back_up() {
    let mut sv = build(CHAIN);
    sv.boot(&BootOptions::default()).unwrap();
    settle(&mut sv);

    let c = sv.find("c").unwrap();
    sv.restart_service(c).unwrap();
    settle(&mut sv);
    assert_eq!(rough(&sv, "c"), Some(RoughState::Up));
}
