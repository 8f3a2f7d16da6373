use super::{Event, EventType, HookResult, Payload, BUILTIN_EVENT_TYPES};
use crate::error::{Error, Result};
use crate::supervisor::Supervisor;
use std::collections::HashMap;
use std::rc::Rc;

/// Hook callback. Hooks get the whole supervisor so they can look up or
/// mutate services while handling the event.
pub type HookFn = Rc<dyn Fn(&mut Supervisor, &mut Event) -> HookResult>;

/// Handle returned by [`EventBus::register_hook`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Hook {
    id: HookId,
    owner: &'static str,
    callback: HookFn,
}

struct Chain {
    event_type: &'static EventType,
    hooks: Vec<Hook>,
}

/// Registry of event types and their hook chains.
pub struct EventBus {
    chains: HashMap<&'static str, Chain>,
    next_hook: u64,
}

impl EventBus {
    /// An empty bus with no event types.
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            next_hook: 1,
        }
    }

    /// A bus with every built-in event type registered.
    pub fn with_builtin_types() -> Self {
        let mut bus = Self::new();
        for event_type in BUILTIN_EVENT_TYPES.iter().copied() {
            bus.chains.insert(
                event_type.name,
                Chain {
                    event_type,
                    hooks: Vec::new(),
                },
            );
        }
        bus
    }

    pub fn register_event_type(&mut self, event_type: &'static EventType) -> Result<()> {
        if self.chains.contains_key(event_type.name) {
            return Err(Error::DuplicateEventType(event_type.name.to_string()));
        }
        self.chains.insert(
            event_type.name,
            Chain {
                event_type,
                hooks: Vec::new(),
            },
        );
        tracing::debug!(event = event_type.name, "Registered event type");
        Ok(())
    }

    /// Removes an event type together with any hooks still attached to it.
    pub fn unregister_event_type(&mut self, event_type: &'static EventType) -> bool {
        match self.chains.get(event_type.name) {
            Some(chain) if chain.event_type == event_type => {
                self.chains.remove(event_type.name);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, event_type: &'static EventType) -> bool {
        self.chains
            .get(event_type.name)
            .is_some_and(|chain| chain.event_type == event_type)
    }

    /// Appends a hook to the chain of `event_type`. `owner` tags the hook
    /// with the module that registered it.
    pub fn register_hook<F>(
        &mut self,
        event_type: &'static EventType,
        owner: &'static str,
        callback: F,
    ) -> Result<HookId>
    where
        F: Fn(&mut Supervisor, &mut Event) -> HookResult + 'static,
    {
        let chain = self
            .chains
            .get_mut(event_type.name)
            .filter(|chain| chain.event_type == event_type)
            .ok_or_else(|| Error::UnknownEventType(event_type.name.to_string()))?;

        let id = HookId(self.next_hook);
        self.next_hook += 1;
        chain.hooks.push(Hook {
            id,
            owner,
            callback: Rc::new(callback),
        });
        Ok(id)
    }

    pub fn unregister_hook(&mut self, id: HookId) -> bool {
        for chain in self.chains.values_mut() {
            if let Some(pos) = chain.hooks.iter().position(|hook| hook.id == id) {
                chain.hooks.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drops every hook registered by `owner`. Returns how many were removed.
    pub fn unregister_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for chain in self.chains.values_mut() {
            let before = chain.hooks.len();
            chain.hooks.retain(|hook| hook.owner != owner);
            removed += before - chain.hooks.len();
        }
        removed
    }

    pub fn hook_count(&self, event_type: &'static EventType) -> usize {
        self.chains
            .get(event_type.name)
            .map_or(0, |chain| chain.hooks.len())
    }

    /// Copies the current chain so hooks may register or unregister hooks
    /// while it is being walked.
    fn snapshot(&self, event_type: &'static EventType) -> Option<Vec<HookFn>> {
        self.chains
            .get(event_type.name)
            .filter(|chain| chain.event_type == event_type)
            .map(|chain| {
                chain
                    .hooks
                    .iter()
                    .map(|hook| Rc::clone(&hook.callback))
                    .collect()
            })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Runs the hook chain for `event`, first responder wins.
    pub fn dispatch(&mut self, event: &mut Event) -> HookResult {
        let Some(hooks) = self.bus.snapshot(event.event_type) else {
            tracing::warn!(
                event = event.event_type.name,
                "Dispatch of unregistered event type"
            );
            return HookResult::NotApplicable;
        };

        let mut result = HookResult::NotApplicable;
        for hook in hooks {
            let answer = hook(self, event);
            match result.fold(answer) {
                Some(acc) => result = acc,
                None => return answer,
            }
        }
        result
    }

    /// Shorthand for dispatching an event whose payload the caller does not
    /// need back.
    pub fn emit(&mut self, event_type: &'static EventType, payload: Payload) -> HookResult {
        let mut event = Event::new(event_type, payload);
        self.dispatch(&mut event)
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.bus
    }
}
