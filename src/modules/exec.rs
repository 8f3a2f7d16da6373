//! Turns a forked child into the configured program.
//!
//! `LAUNCH` looks up the data entry named by the process kind (`daemon`,
//! `start`, `stop`). A text entry runs through `/bin/sh -c`; a list entry is
//! executed directly, searching `PATH` for the first element.

use crate::error::Result;
use crate::event::{HookResult, Payload, AFTER_FORK, LAUNCH};
use crate::module::{check_api_version, Module};
use crate::registry::DataValue;
use crate::supervisor::Supervisor;
use nix::unistd::{execve, execvpe, setsid};
use std::ffi::CString;

pub const NAME: &str = "exec";

const SHELL: &str = "/bin/sh";

#[derive(Debug, Default)]
pub struct ExecModule;

impl Module for ExecModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        sv.events().register_hook(&AFTER_FORK, NAME, |_, _| {
            // Own session, so signals for the supervisor's terminal do not
            // reach services.
            match setsid() {
                Ok(_) => HookResult::Ok,
                Err(errno) => {
                    tracing::error!(%errno, "setsid failed");
                    HookResult::Fail
                }
            }
        })?;
        sv.events().register_hook(&LAUNCH, NAME, launch)?;
        Ok(())
    }
}

/// How a data entry is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Shell(String),
    Argv(Vec<String>),
}

impl Command {
    pub(crate) fn from_data(value: &DataValue) -> Option<Self> {
        match value {
            DataValue::Text(line) if !line.trim().is_empty() => Some(Command::Shell(line.clone())),
            DataValue::List(argv) if !argv.is_empty() => Some(Command::Argv(argv.clone())),
            _ => None,
        }
    }

    fn argv(&self) -> Vec<String> {
        match self {
            Command::Shell(line) => vec![SHELL.to_string(), "-c".to_string(), line.clone()],
            Command::Argv(argv) => argv.clone(),
        }
    }
}

fn launch(sv: &mut Supervisor, event: &mut crate::event::Event) -> HookResult {
    let Payload::Launch {
        service, exec_name, ..
    } = &event.payload
    else {
        return HookResult::NotApplicable;
    };
    let Some(command) = sv
        .service(*service)
        .and_then(|s| s.data().get(exec_name))
        .and_then(Command::from_data)
    else {
        return HookResult::NotApplicable;
    };

    let env: Vec<String> = sv
        .service_environment(*service)
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    let (Some(argv), Some(envp)) = (to_cstrings(command.argv()), to_cstrings(env)) else {
        tracing::error!(entry = %exec_name, "Command contains a NUL byte");
        return HookResult::Fail;
    };

    // Only returns on failure; stderr is already the service's output pipe.
    let result = match command {
        Command::Shell(_) => execve(&argv[0], &argv, &envp),
        Command::Argv(_) => execvpe(&argv[0], &argv, &envp),
    };
    let Err(errno) = result;
    tracing::error!(entry = %exec_name, %errno, "exec failed");
    HookResult::Fail
}

fn to_cstrings(items: Vec<String>) -> Option<Vec<CString>> {
    items.into_iter().map(|s| CString::new(s).ok()).collect()
}
