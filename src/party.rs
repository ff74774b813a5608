//! A single participant of a protocol: its variables, its transport and its usage statistics.

use std::{
    cell::RefCell,
    collections::HashMap,
    ops::{Add, AddAssign},
    rc::Rc,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::TransportConfig,
    error::Error,
    transport::{Endpoint, Transport},
};

/// The prefix reserved for internal use; variable names must not start with it.
pub const RESERVED_PREFIX: char = '_';

/// A party shared between a protocol and the subroutines it runs.
pub type PartyRef = Rc<RefCell<Party>>;

/// Fails with [`Error::InvalidVariableName`] if any name starts with the reserved prefix.
pub fn check_var_names<S: AsRef<str>>(names: &[S]) -> Result<(), Error> {
    match names
        .iter()
        .find(|name| name.as_ref().starts_with(RESERVED_PREFIX))
    {
        Some(name) => Err(Error::InvalidVariableName(name.as_ref().to_string())),
        None => Ok(()),
    }
}

/// Converts any serializable value into a variable value.
///
/// Fails for data JSON cannot represent, such as maps with non-string keys.
pub fn to_value<T: Serialize>(value: T) -> Result<Value, Error> {
    Ok(serde_json::to_value(value)?)
}

/// Usage counters of a party, accumulated over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Number of local computations run.
    pub computations: usize,
    /// Wall-clock time spent in local computations.
    pub computation_time: Duration,
    /// Bytes sent, measured as the compact JSON encoding of the values.
    pub bytes_sent: usize,
    /// Number of variables sent.
    pub variables_sent: usize,
    /// Bytes received, measured as the compact JSON encoding of the values.
    pub bytes_received: usize,
    /// Number of variables received.
    pub variables_received: usize,
}

impl AddAssign for Statistics {
    fn add_assign(&mut self, rhs: Self) {
        self.computations += rhs.computations;
        self.computation_time += rhs.computation_time;
        self.bytes_sent += rhs.bytes_sent;
        self.variables_sent += rhs.variables_sent;
        self.bytes_received += rhs.bytes_received;
        self.variables_received += rhs.variables_received;
    }
}

impl Add for Statistics {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    NotReceived { sender: String },
}

/// The variables of one protocol level. Subroutines push a fresh frame.
#[derive(Debug, Default)]
struct Frame {
    protocol: Option<String>,
    vars: HashMap<String, Slot>,
}

/// A participant holding local variables and a [`Transport`] to reach other parties.
#[derive(Debug)]
pub struct Party {
    name: String,
    frames: Vec<Frame>,
    transport: Transport,
    distributed: bool,
    running: bool,
    stats: Statistics,
}

impl Party {
    /// Creates a party with a simulated transport.
    pub fn new(name: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            name: name.into(),
            frames: vec![Frame::default()],
            transport: Transport::new(config),
            distributed: false,
            running: false,
            stats: Statistics::default(),
        }
    }

    /// Wraps the party in a shareable handle.
    pub fn into_ref(self) -> PartyRef {
        Rc::new(RefCell::new(self))
    }

    /// The name the party was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this party executes in this process.
    ///
    /// Every party is local until a distributed run is configured; from then on only the running
    /// party is.
    pub fn is_local(&self) -> bool {
        !self.distributed || self.running
    }

    /// Marks the party as part of a distributed run, either as the one running here or a remote one.
    pub fn set_running(&mut self, running: bool) {
        self.distributed = true;
        self.running = running;
    }

    /// The party's transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The party's transport, mutably.
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// A handle other parties use to send to and receive from this party.
    pub fn endpoint(&self) -> Endpoint {
        self.transport.endpoint()
    }

    fn frame(&self) -> &Frame {
        // the top-level frame is never popped
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    /// Sets a variable in the current namespace.
    pub fn set_local_variable(&mut self, name: &str, value: Value) -> Result<(), Error> {
        check_var_names(&[name])?;
        self.frame_mut()
            .vars
            .insert(name.to_string(), Slot::Value(value));
        Ok(())
    }

    /// Reads a variable from the current namespace.
    pub fn get_variable(&self, name: &str) -> Result<Value, Error> {
        if !self.is_local() {
            return Err(Error::InvalidLocalVariableAccess {
                party: self.name.clone(),
                variable: name.to_string(),
            });
        }
        match self.frame().vars.get(name) {
            Some(Slot::Value(value)) => Ok(value.clone()),
            Some(Slot::NotReceived { sender }) => Err(Error::VariableNotReceived {
                party: self.name.clone(),
                variable: name.to_string(),
                sender: sender.clone(),
            }),
            None => Err(Error::NonExistentVariable {
                party: self.name.clone(),
                variable: name.to_string(),
            }),
        }
    }

    /// Whether `name` holds a value (received variables that did not arrive do not count).
    pub fn has_variable(&self, name: &str) -> bool {
        matches!(self.frame().vars.get(name), Some(Slot::Value(_)))
    }

    /// Runs `computation` and stores its results under `names`, in order.
    ///
    /// The computation reads its inputs through the party it is given.
    pub fn run_computation<F>(
        &mut self,
        names: &[&str],
        computation: F,
        description: &str,
    ) -> Result<(), Error>
    where
        F: FnOnce(&Party) -> Result<Vec<Value>, Error>,
    {
        check_var_names(names)?;
        let start = Instant::now();
        let values = computation(self)?;
        self.stats.computations += 1;
        self.stats.computation_time += start.elapsed();
        if values.len() != names.len() {
            return Err(Error::DimensionMismatch {
                expected: names.len(),
                actual: values.len(),
            });
        }
        debug!("{} computed {names:?}: {description}", self.name);
        for (name, value) in names.iter().zip(values) {
            self.set_local_variable(name, value)?;
        }
        Ok(())
    }

    /// Sends the current values of `names` to `receiver`.
    pub fn send_variables(&mut self, receiver: &Endpoint, names: &[&str]) -> Result<(), Error> {
        check_var_names(names)?;
        let mut vars = Vec::with_capacity(names.len());
        let mut bytes = 0;
        for name in names {
            let value = self.get_variable(name)?;
            bytes += serde_json::to_string(&value)?.len();
            vars.push((name.to_string(), value));
        }
        self.transport.send_variables(receiver, vars)?;
        self.stats.bytes_sent += bytes;
        self.stats.variables_sent += names.len();
        Ok(())
    }

    /// Receives `names` from the party `sender_name` reachable at `sender`.
    ///
    /// Variables that do not arrive in time are recorded as not received; reading them later
    /// fails with [`Error::VariableNotReceived`].
    pub fn receive_variables(
        &mut self,
        sender_name: &str,
        sender: &Endpoint,
        names: &[&str],
    ) -> Result<(), Error> {
        check_var_names(names)?;
        let timeout = self.transport.config().receive_timeout();
        for name in names {
            let slot = match self.transport.receive_variable(sender, name, timeout) {
                Some(value) => {
                    self.stats.bytes_received += serde_json::to_string(&value)?.len();
                    self.stats.variables_received += 1;
                    Slot::Value(value)
                }
                None => {
                    warn!("{} did not receive '{name}' from {sender_name}", self.name);
                    Slot::NotReceived {
                        sender: sender_name.to_string(),
                    }
                }
            };
            self.frame_mut().vars.insert(name.to_string(), slot);
        }
        Ok(())
    }

    /// Enters the namespace of a subroutine protocol; outer variables become invisible.
    pub fn start_subroutine_protocol(&mut self, protocol: &str) {
        debug!("{} enters subroutine '{protocol}'", self.name);
        self.frames.push(Frame {
            protocol: Some(protocol.to_string()),
            vars: HashMap::new(),
        });
    }

    /// Leaves the current subroutine, discarding its variables.
    pub fn end_subroutine_protocol(&mut self) {
        if self.frames.len() == 1 {
            warn!("{} is not inside a subroutine", self.name);
            return;
        }
        if let Some(frame) = self.frames.pop() {
            debug!("{} leaves subroutine {:?}", self.name, frame.protocol);
        }
    }

    /// The counters accumulated so far.
    pub fn get_statistics(&self) -> Statistics {
        self.stats
    }

    /// Shuts down the party's transport.
    pub fn exit_protocol(&mut self) {
        self.transport.close();
    }
}
