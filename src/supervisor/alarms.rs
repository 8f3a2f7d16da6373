use super::Supervisor;
use crate::registry::ServiceId;
use chrono::TimeDelta;
use std::time::Duration;
use tracing::Level;

/// Smallest wall/monotonic disagreement treated as a clock change.
const CLOCK_JUMP_THRESHOLD_MS: i64 = 1000;

impl Supervisor {
    /// Arms the service's alarm `after` from now. The current state's
    /// `on_alarm` handler runs once it is due. Any state change cancels it.
    pub fn set_alarm(&mut self, id: ServiceId, after: Duration) {
        let delta = TimeDelta::from_std(after).unwrap_or(TimeDelta::MAX);
        let Some(deadline) = self.now.checked_add_signed(delta) else {
            tracing::warn!(service = %id, ?after, "Alarm out of range, ignored");
            return;
        };
        let Some(service) = self.registry.get_mut(id) else {
            return;
        };
        service.set_alarm(Some(deadline));
        self.next_alarm = Some(match self.next_alarm {
            Some(current) => current.min(deadline),
            None => deadline,
        });
    }

    pub fn cancel_alarm(&mut self, id: ServiceId) {
        if let Some(service) = self.registry.get_mut(id) {
            service.set_alarm(None);
        }
    }

    /// Runs the alarm handler of every service whose alarm is due.
    pub(crate) fn process_alarms(&mut self) {
        match self.next_alarm {
            Some(next) if next <= self.now => {}
            _ => return,
        }

        let now = self.now;
        for id in self.registry.due_alarms(now) {
            // An earlier handler may have moved this service on.
            let Some(service) = self.registry.get_mut(id) else {
                continue;
            };
            if !service.alarm().is_some_and(|deadline| deadline <= now) {
                continue;
            }
            service.set_alarm(None);
            let state = service.current();
            match state.on_alarm {
                Some(handler) => handler(self, id),
                None => tracing::debug!(
                    service = %id,
                    state = state.name,
                    "Alarm fired in a state without an alarm handler"
                ),
            }
        }
        self.next_alarm = self.registry.next_alarm();
    }

    /// Reads the clock and compensates for wall clock changes: when wall
    /// time moved differently from monotonic time since the last tick,
    /// every stored timestamp and alarm is shifted by the difference.
    pub(crate) fn refresh_clock(&mut self) {
        let wall = self.clock.wall();
        let monotonic = self.clock.monotonic();
        let elapsed = monotonic.saturating_sub(self.last_monotonic);
        let expected = self.now + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero());
        let jump = wall.signed_duration_since(expected);

        if jump.num_milliseconds().abs() >= CLOCK_JUMP_THRESHOLD_MS {
            self.registry.shift_timestamps(jump);
            self.next_alarm = self.next_alarm.map(|deadline| deadline + jump);
            self.report(
                Level::INFO,
                format!(
                    "System clock changed by {}s, adjusted service timestamps",
                    jump.num_seconds()
                ),
            );
        }
        self.now = wall;
        self.last_monotonic = monotonic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::{RoughState, Service, StateDef};
    use crate::supervisor::ManualClock;
    use chrono::{DateTime, Utc};
    use std::cell::Cell;

    thread_local! {
        static FIRED: Cell<u32> = const { Cell::new(0) };
    }

    fn count_alarm(_: &mut Supervisor, _: ServiceId) {
        FIRED.with(|fired| fired.set(fired.get() + 1));
    }

    static ARMED: StateDef =
        StateDef::new("TestArmed", "waits for an alarm", RoughState::Waiting).on_alarm(count_alarm);
    static QUIET: StateDef = StateDef::new("TestQuiet", "no alarm handler", RoughState::Up);

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_alarm_fires_once_when_due() {
        let clock = ManualClock::new(start());
        let handle = clock.handle();
        let mut sv = Supervisor::with_clock(Settings::default(), Box::new(clock));
        sv.registry_mut().register_state(&ARMED).unwrap();
        let id = sv.admit(Service::new("a").with_state(&ARMED)).unwrap();

        FIRED.with(|f| f.set(0));
        sv.set_alarm(id, Duration::from_secs(5));

        handle.advance(Duration::from_secs(4));
        sv.refresh_clock();
        sv.process_alarms();
        assert_eq!(FIRED.with(Cell::get), 0);

        handle.advance(Duration::from_secs(1));
        sv.refresh_clock();
        sv.process_alarms();
        sv.process_alarms();
        assert_eq!(FIRED.with(Cell::get), 1);
        assert!(sv.service(id).unwrap().alarm().is_none());
    }

    #[test]
    fn test_state_change_cancels_alarm() {
        let clock = ManualClock::new(start());
        let handle = clock.handle();
        let mut sv = Supervisor::with_clock(Settings::default(), Box::new(clock));
        sv.registry_mut().register_states(&[&ARMED, &QUIET]).unwrap();
        let id = sv.admit(Service::new("a").with_state(&ARMED)).unwrap();

        FIRED.with(|f| f.set(0));
        sv.set_alarm(id, Duration::from_secs(1));
        sv.request_state(id, &QUIET);
        handle.advance(Duration::from_secs(2));
        sv.refresh_clock();
        sv.process_alarms();
        assert_eq!(FIRED.with(Cell::get), 0);
    }

    #[test]
    fn test_clock_jump_shifts_alarm_and_timestamps() {
        let clock = ManualClock::new(start());
        let handle = clock.handle();
        let mut sv = Supervisor::with_clock(Settings::default(), Box::new(clock));
        sv.registry_mut().register_state(&ARMED).unwrap();
        let id = sv.admit(Service::new("a").with_state(&ARMED)).unwrap();
        let since = sv.service(id).unwrap().current_since();

        FIRED.with(|f| f.set(0));
        sv.set_alarm(id, Duration::from_secs(10));

        handle.jump(TimeDelta::hours(1));
        handle.advance(Duration::from_secs(2));
        sv.refresh_clock();
        sv.process_alarms();
        assert_eq!(FIRED.with(Cell::get), 0);

        let service = sv.service(id).unwrap();
        assert_eq!(service.current_since(), since + TimeDelta::hours(1));
        assert_eq!(
            service.alarm(),
            Some(start() + TimeDelta::hours(1) + TimeDelta::seconds(10))
        );

        handle.advance(Duration::from_secs(8));
        sv.refresh_clock();
        sv.process_alarms();
        assert_eq!(FIRED.with(Cell::get), 1);
    }

    #[test]
    fn test_small_drift_is_ignored() {
        let clock = ManualClock::new(start());
        let handle = clock.handle();
        let mut sv = Supervisor::with_clock(Settings::default(), Box::new(clock));
        let id = sv.admit(Service::new("a")).unwrap();
        let since = sv.service(id).unwrap().current_since();

        handle.jump(TimeDelta::milliseconds(400));
        sv.refresh_clock();
        assert_eq!(sv.service(id).unwrap().current_since(), since);
    }
}
