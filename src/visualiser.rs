//! Observers notified of every step of a protocol execution.
//!
//! A [`Visualiser`] never influences execution. Hosting applications plug in their own
//! implementation (for example a GUI) via [`Session::set_visualiser`](crate::Session::set_visualiser);
//! by default every event is dropped by [`NoopVisualiser`].

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Variable values keyed by variable name.
pub type Variables = BTreeMap<String, Value>;

/// Transferred variables; `None` marks a value that is not known in this process.
pub type MessageVariables = BTreeMap<String, Option<Value>>;

/// Variable values keyed by role name, then by variable name.
pub type RoleValues = BTreeMap<String, Variables>;

/// Variable names mapped to other variable names, keyed by role name.
pub type NameMapping = BTreeMap<String, BTreeMap<String, String>>;

/// The inputs of a subroutine as reported by [`Visualiser::start_subroutine`].
#[derive(Debug, Clone, Copy)]
pub enum SubroutineInputs<'a> {
    /// Per subroutine role, which outer variable feeds which subroutine input.
    Plan(&'a NameMapping),
    /// Per subroutine role, the input values that were actually passed in.
    Values(&'a RoleValues),
}

/// Receives protocol execution events. Every method defaults to doing nothing.
pub trait Visualiser {
    /// A free-text milestone or comment.
    fn add_step(&mut self, _step: &str) {}

    /// A local computation by `party` produced `computed`.
    fn add_computation(&mut self, _party: &str, _computed: &Variables, _description: &str) {}

    /// A point-to-point transfer.
    fn send_message(&mut self, _sender: &str, _receiver: &str, _variables: &MessageVariables) {}

    /// A transfer from `sender` to every other party.
    fn broadcast_variable(&mut self, _sender: &str, _variables: &MessageVariables) {}

    /// A subroutine starts; events up to the matching [`Visualiser::end_subroutine`] belong to it.
    ///
    /// `roles` maps every subroutine role to the outer party playing it. This is called twice per
    /// subroutine: first with the input plan, then with the realized input values.
    fn start_subroutine(
        &mut self,
        _name: &str,
        _roles: &BTreeMap<String, String>,
        _inputs: SubroutineInputs<'_>,
        _outputs: &NameMapping,
    ) {
    }

    /// The current subroutine ended with `outputs`, keyed by subroutine role.
    fn end_subroutine(&mut self, _outputs: &RoleValues) {}
}

/// Ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVisualiser;

impl Visualiser for NoopVisualiser {}

/// Emits every event as an `info` tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingVisualiser;

impl Visualiser for TracingVisualiser {
    fn add_step(&mut self, step: &str) {
        info!(target: "smpc_sim::visualiser", "{step}");
    }

    fn add_computation(&mut self, party: &str, computed: &Variables, description: &str) {
        info!(target: "smpc_sim::visualiser", ?computed, "{party} computes: {description}");
    }

    fn send_message(&mut self, sender: &str, receiver: &str, variables: &MessageVariables) {
        info!(target: "smpc_sim::visualiser", ?variables, "{sender} -> {receiver}");
    }

    fn broadcast_variable(&mut self, sender: &str, variables: &MessageVariables) {
        info!(target: "smpc_sim::visualiser", ?variables, "{sender} -> *");
    }

    fn start_subroutine(
        &mut self,
        name: &str,
        roles: &BTreeMap<String, String>,
        inputs: SubroutineInputs<'_>,
        outputs: &NameMapping,
    ) {
        info!(target: "smpc_sim::visualiser", ?roles, ?inputs, ?outputs, "start subroutine {name}");
    }

    fn end_subroutine(&mut self, outputs: &RoleValues) {
        info!(target: "smpc_sim::visualiser", ?outputs, "end subroutine");
    }
}

/// A recorded protocol event, see [`EventLog`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// See [`Visualiser::add_step`].
    Step {
        /// The comment.
        step: String,
    },
    /// See [`Visualiser::add_computation`].
    Computation {
        /// The computing party.
        party: String,
        /// The computed values.
        computed: Variables,
        /// What was computed.
        description: String,
    },
    /// See [`Visualiser::send_message`].
    Message {
        /// The sending party.
        sender: String,
        /// The receiving party.
        receiver: String,
        /// The transferred values.
        variables: MessageVariables,
    },
    /// See [`Visualiser::broadcast_variable`].
    Broadcast {
        /// The broadcasting party.
        sender: String,
        /// The transferred values.
        variables: MessageVariables,
    },
    /// See [`Visualiser::start_subroutine`].
    StartSubroutine {
        /// The subroutine protocol.
        name: String,
        /// Subroutine role to outer party.
        roles: BTreeMap<String, String>,
        /// Set for the first report, with the input plan.
        input_plan: Option<NameMapping>,
        /// Set for the second report, with the input values.
        input_values: Option<RoleValues>,
        /// Subroutine output to outer variable name.
        outputs: NameMapping,
    },
    /// See [`Visualiser::end_subroutine`].
    EndSubroutine {
        /// The subroutine outputs.
        outputs: RoleValues,
    },
}

/// Records every event in a shared log.
///
/// Clones share the same log, so a hosting application can keep one handle while the protocol
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    /// The recorded events as a JSON array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.0.borrow())
    }

    fn record(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }
}

impl Visualiser for EventLog {
    fn add_step(&mut self, step: &str) {
        self.record(Event::Step {
            step: step.to_string(),
        });
    }

    fn add_computation(&mut self, party: &str, computed: &Variables, description: &str) {
        self.record(Event::Computation {
            party: party.to_string(),
            computed: computed.clone(),
            description: description.to_string(),
        });
    }

    fn send_message(&mut self, sender: &str, receiver: &str, variables: &MessageVariables) {
        self.record(Event::Message {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            variables: variables.clone(),
        });
    }

    fn broadcast_variable(&mut self, sender: &str, variables: &MessageVariables) {
        self.record(Event::Broadcast {
            sender: sender.to_string(),
            variables: variables.clone(),
        });
    }

    fn start_subroutine(
        &mut self,
        name: &str,
        roles: &BTreeMap<String, String>,
        inputs: SubroutineInputs<'_>,
        outputs: &NameMapping,
    ) {
        let (input_plan, input_values) = match inputs {
            SubroutineInputs::Plan(plan) => (Some(plan.clone()), None),
            SubroutineInputs::Values(values) => (None, Some(values.clone())),
        };
        self.record(Event::StartSubroutine {
            name: name.to_string(),
            roles: roles.clone(),
            input_plan,
            input_values,
            outputs: outputs.clone(),
        });
    }

    fn end_subroutine(&mut self, outputs: &RoleValues) {
        self.record(Event::EndSubroutine {
            outputs: outputs.clone(),
        });
    }
}
