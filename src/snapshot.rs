//! State carried across a hot reload.
//!
//! Before re-executing itself the supervisor writes every service with its
//! type, current state, data and live processes to a JSON file. The new
//! image reads it back and adopts the processes instead of booting.

use crate::error::{Error, Result};
use crate::process::Pipe;
use crate::registry::{DataStore, Service};
use crate::supervisor::Supervisor;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::fd::RawFd;
use std::path::Path;
use tracing::Level;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub runlevel: String,
    pub prev_runlevel: String,
    pub services: Vec<ServiceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub service_type: String,
    pub state: String,
    #[serde(default)]
    pub data: DataStore,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub kind: String,
    pub pid: i32,
    /// Output pipes whose read ends are inherited across the re-exec.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipes: Vec<PipeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSnapshot {
    /// Read end in the supervisor.
    pub fd: RawFd,
    /// Descriptors the child writes to.
    pub targets: Vec<RawFd>,
}

impl Snapshot {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!(
                "Cannot read state snapshot {}: {}",
                path.display(),
                err
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Supervisor {
    /// Captures every typed service. Untyped services cannot be rebuilt and
    /// are left out.
    pub fn snapshot(&self) -> Snapshot {
        let services = self
            .registry
            .iter()
            .filter_map(|(_, service)| {
                let service_type = service.service_type()?;
                Some(ServiceSnapshot {
                    name: service.name().to_string(),
                    service_type: service_type.name.to_string(),
                    state: service.current().name.to_string(),
                    data: service.data().clone(),
                    processes: service
                        .processes()
                        .iter()
                        .filter(|p| !p.is_free())
                        .filter_map(|p| {
                            p.pid().map(|pid| ProcessSnapshot {
                                kind: p.kind().name.to_string(),
                                pid: pid.as_raw(),
                                pipes: p
                                    .pipes()
                                    .iter()
                                    .filter(|pipe| pipe.buffer().is_some())
                                    .filter_map(|pipe| {
                                        pipe.parent_fd().map(|fd| PipeSnapshot {
                                            fd,
                                            targets: pipe.targets().to_vec(),
                                        })
                                    })
                                    .collect(),
                            })
                        })
                        .collect(),
                })
            })
            .collect();
        Snapshot {
            runlevel: self.runlevel.clone(),
            prev_runlevel: self.prev_runlevel.clone(),
            services,
        }
    }

    /// Takes the snapshot written before re-executing for a hot reload. The
    /// recorded output pipes are released so their read ends stay open
    /// across `exec` and the daemons behind them keep a reader.
    pub fn hand_over(&mut self) -> Result<Snapshot> {
        let snapshot = self.snapshot();
        let mut released = 0;
        for id in self.registry.ids() {
            let Some(service) = self.registry.get_mut(id) else {
                continue;
            };
            for process in service.processes_mut().iter_mut().filter(|p| !p.is_free()) {
                for pipe in process.pipes_mut().iter_mut().filter(|p| p.buffer().is_some()) {
                    if pipe.hand_over()?.is_some() {
                        released += 1;
                    }
                }
            }
        }
        tracing::debug!(pipes = released, "Output pipes handed over");
        Ok(snapshot)
    }

    /// Rebuilds services from a snapshot and adopts their processes.
    /// Entries naming an unknown type or state are skipped, as are
    /// processes of an unknown kind. Returns how many services were
    /// restored.
    pub fn restore(&mut self, snapshot: &Snapshot) -> usize {
        self.runlevel = snapshot.runlevel.clone();
        self.prev_runlevel = snapshot.prev_runlevel.clone();

        let mut restored = 0;
        for entry in &snapshot.services {
            let Some(service_type) = self.registry.service_type(&entry.service_type) else {
                self.report(
                    Level::WARN,
                    format!(
                        "Not restoring {}: unknown service type '{}'",
                        entry.name, entry.service_type
                    ),
                );
                continue;
            };
            let Some(state) = self.registry.state_by_name(&entry.state) else {
                self.report(
                    Level::WARN,
                    format!("Not restoring {}: unknown state '{}'", entry.name, entry.state),
                );
                continue;
            };

            let record = Service::new(entry.name.as_str())
                .with_type(service_type)
                .with_data(entry.data.clone())
                .with_state(state);
            let id = match self.registry.register(record, self.now) {
                Ok(id) => id,
                Err(err) => {
                    self.report(Level::WARN, format!("Not restoring {}: {}", entry.name, err));
                    continue;
                }
            };

            for process in &entry.processes {
                let Some(kind) = self.registry.process_kind(&process.kind) else {
                    self.report(
                        Level::WARN,
                        format!(
                            "Not adopting pid {} of {}: unknown process kind '{}'",
                            process.pid, entry.name, process.kind
                        ),
                    );
                    continue;
                };
                let pid = Pid::from_raw(process.pid);
                if let Err(err) = self.attach_process(id, kind, pid) {
                    self.report(
                        Level::WARN,
                        format!("Not adopting pid {} of {}: {}", process.pid, entry.name, err),
                    );
                    continue;
                }
                for recorded in &process.pipes {
                    match Pipe::adopt(recorded.fd, &recorded.targets) {
                        Ok(pipe) => {
                            if let Some(record) =
                                self.registry.get_mut(id).and_then(|s| s.process_mut(pid))
                            {
                                record.add_pipe(pipe);
                            }
                        }
                        Err(err) => self.report(
                            Level::WARN,
                            format!(
                                "Output of pid {} of {} is lost: fd {} not usable: {}",
                                process.pid, entry.name, recorded.fd, err
                            ),
                        ),
                    }
                }
            }
            restored += 1;
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::modules::daemon::{DaemonModule, DAEMON_PROCESS, DAEMON_RUNNING, DAEMON_TYPE};
    use crate::modules::exec::ExecModule;
    use tempfile::TempDir;

    fn supervisor() -> Supervisor {
        let mut sv = Supervisor::new(Settings::default());
        sv.load_modules(vec![Box::new(ExecModule), Box::new(DaemonModule)]);
        sv
    }

    #[test]
    fn test_snapshot_restores_state_and_processes() {
        let mut old = supervisor();
        old.set_runlevel("multi");
        let mut service = Service::new("sshd").with_type(&DAEMON_TYPE);
        service.data_mut().set_text("daemon", "/usr/sbin/sshd -D");
        let id = old.admit(service).unwrap();
        old.request_state(id, &DAEMON_RUNNING);
        old.attach_process(id, &DAEMON_PROCESS, Pid::from_raw(4242)).unwrap();
        old.admit(Service::new("untyped")).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        old.snapshot().write(&path).unwrap();

        let mut new = supervisor();
        let snapshot = Snapshot::read(&path).unwrap();
        assert_eq!(snapshot.services.len(), 1);
        assert_eq!(new.restore(&snapshot), 1);

        let id = new.find("sshd").unwrap();
        let service = new.service(id).unwrap();
        assert_eq!(service.current(), &DAEMON_RUNNING);
        assert_eq!(service.data().text("daemon"), Some("/usr/sbin/sshd -D"));
        assert_eq!(
            service.process_of_kind(&DAEMON_PROCESS).and_then(|p| p.pid()),
            Some(Pid::from_raw(4242))
        );
        assert_eq!(new.runlevel(), "multi");
    }

    #[test]
    fn test_restore_skips_unknown_entries() {
        let mut sv = supervisor();
        let snapshot = Snapshot {
            runlevel: "default".into(),
            prev_runlevel: "default".into(),
            services: vec![
                ServiceSnapshot {
                    name: "a".into(),
                    service_type: "nonexistent".into(),
                    state: "DaemonRunning".into(),
                    data: DataStore::new(),
                    processes: Vec::new(),
                },
                ServiceSnapshot {
                    name: "b".into(),
                    service_type: "daemon".into(),
                    state: "NoSuchState".into(),
                    data: DataStore::new(),
                    processes: Vec::new(),
                },
            ],
        };
        assert_eq!(sv.restore(&snapshot), 0);
        assert!(sv.registry().is_empty());
    }

    #[test]
    fn test_read_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(Snapshot::read(&dir.path().join("absent.json")).is_err());
    }
}
