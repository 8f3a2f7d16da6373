//! Exercises the public extension surface the way an out-of-tree module
//! would: its own states, service type, alarms and event hooks, driven by a
//! manual clock.

use chrono::{TimeDelta, TimeZone, Utc};
use service_supervisor::error::Result;
use service_supervisor::event::{EventType, HookResult, Payload, MAIN, UP_MET};
use service_supervisor::module::{check_api_version, Module};
use service_supervisor::registry::{RoughState, Service, ServiceId, ServiceType, StateDef};
use service_supervisor::supervisor::{ClockHandle, ManualClock, Supervisor};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

static TIMER_ARMED: StateDef = StateDef::new("TimerArmed", "Alarm pending", RoughState::Up)
    .on_enter(arm)
    .on_alarm(fire);
static TIMER_FIRED: StateDef = StateDef::new("TimerFired", "Alarm went off", RoughState::Up);
static TIMER_IDLE: StateDef = StateDef::new("TimerIdle", "Stopped", RoughState::Down);

static TIMER_TYPE: ServiceType = ServiceType {
    name: "timer",
    description: "Goes off ten seconds after it starts",
    start: start_timer,
    stop: stop_timer,
    restart: None,
};

static CUSTOM_EVENT: EventType = EventType::new("TIMER_TICK", "Custom event of the timer module");

fn arm(sv: &mut Supervisor, id: ServiceId) {
    sv.set_alarm(id, Duration::from_secs(10));
}

fn fire(sv: &mut Supervisor, id: ServiceId) {
    sv.request_state(id, &TIMER_FIRED);
}

fn start_timer(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    sv.request_state(id, &TIMER_ARMED);
    Ok(())
}

fn stop_timer(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    sv.request_state(id, &TIMER_IDLE);
    Ok(())
}

struct TimerModule {
    ticks: Rc<Cell<usize>>,
}

impl Module for TimerModule {
    fn name(&self) -> &'static str {
        "timer"
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version("timer", api_version)?;
        sv.registry_mut()
            .register_states(&[&TIMER_ARMED, &TIMER_FIRED, &TIMER_IDLE])?;
        sv.registry_mut().register_service_type(&TIMER_TYPE)?;
        sv.events().register_event_type(&CUSTOM_EVENT)?;
        let ticks = Rc::clone(&self.ticks);
        sv.events().register_hook(&MAIN, "timer", move |_, _| {
            ticks.set(ticks.get() + 1);
            HookResult::Ok
        })?;
        Ok(())
    }

    fn unload(&mut self, sv: &mut Supervisor) {
        sv.events().unregister_event_type(&CUSTOM_EVENT);
        sv.registry_mut().unregister_service_type(&TIMER_TYPE);
        for state in [&TIMER_ARMED, &TIMER_FIRED, &TIMER_IDLE] {
            sv.registry_mut().unregister_state(state);
        }
    }
}

fn setup() -> (Supervisor, ClockHandle, ServiceId, Rc<Cell<usize>>) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    let handle = clock.handle();
    let ticks = Rc::new(Cell::new(0));
    let mut sv = Supervisor::builder()
        .clock(Box::new(clock))
        .module(Box::new(TimerModule {
            ticks: Rc::clone(&ticks),
        }))
        .build()
        .unwrap();
    let id = sv
        .admit(Service::new("timer/one").with_type(&TIMER_TYPE))
        .unwrap();
    sv.start_service(id).unwrap();
    sv.poll_once();
    (sv, handle, id, ticks)
}

#[test]
fn test_alarm_fires_after_its_delay() {
    let (mut sv, clock, id, ticks) = setup();
    assert_eq!(sv.state_of(id), Some(&TIMER_ARMED));
    assert!(ticks.get() >= 1);

    clock.advance(Duration::from_secs(9));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_ARMED));

    clock.advance(Duration::from_secs(1));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_FIRED));
}

#[test]
fn test_forward_clock_jump_does_not_fire_alarms_early() {
    let (mut sv, clock, id, _) = setup();
    let since = sv.service(id).unwrap().current_since();

    clock.jump(TimeDelta::hours(1));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_ARMED));
    assert_eq!(
        sv.service(id).unwrap().current_since(),
        since + TimeDelta::hours(1)
    );

    clock.advance(Duration::from_secs(10));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_FIRED));
}

#[test]
fn test_backward_clock_jump_does_not_delay_alarms() {
    let (mut sv, clock, id, _) = setup();

    clock.jump(TimeDelta::days(-1));
    sv.poll_once();
    clock.advance(Duration::from_secs(10));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_FIRED));
}

#[test]
fn test_state_change_cancels_alarm() {
    let (mut sv, clock, id, _) = setup();
    sv.stop_service(id).unwrap();
    assert!(sv.service(id).unwrap().alarm().is_none());

    clock.advance(Duration::from_secs(30));
    sv.poll_once();
    assert_eq!(sv.state_of(id), Some(&TIMER_IDLE));
}

#[test]
fn test_up_check_veto_and_custom_event() {
    let (mut sv, _, id, _) = setup();
    assert!(sv.up_check(id));
    sv.events()
        .register_hook(&UP_MET, "veto", |_, _| HookResult::Fail)
        .unwrap();
    assert!(!sv.up_check(id));

    assert!(sv.events().register_event_type(&CUSTOM_EVENT).is_err());
    assert_eq!(sv.emit(&CUSTOM_EVENT, Payload::None), HookResult::NotApplicable);
}

#[test]
fn test_unloading_module_removes_its_hooks() {
    let (mut sv, _, _, ticks) = setup();
    assert!(sv.mark_module_for_removal("timer"));
    sv.poll_once();
    let after_unload = ticks.get();
    sv.poll_once();
    assert_eq!(ticks.get(), after_unload);
    assert!(sv.registry().service_type("timer").is_none());
}
