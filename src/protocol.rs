//! Multi-party protocols as sequences of local computations and variable transfers.
//!
//! A concrete protocol implements [`Protocol`]: it declares its roles, its inputs and outputs,
//! and a body that drives a [`Context`]. Every operation of the context is dispatched to the
//! parties involved and reported to the [`Visualiser`].
//!
//! When a protocol runs distributed, the same body executes in every process, but each process
//! only performs the steps of its own (local) party: computations of remote parties are skipped,
//! sends happen on the sending side and receives on the receiving side.
//!
//! # Composition
//!
//! [`Context::run_subroutine_protocol`] runs another protocol on (a subset of) the parties of the
//! current one. The subroutine protocol value is moved into the call, so it is bound to exactly
//! one party set at a time. Its inputs are copied from outer variables and its outputs copied back
//! under caller-chosen names; the parties see a fresh namespace for the duration of the
//! subroutine, so inner and outer variables never alias.

use std::{
    collections::{BTreeMap, HashMap},
    mem,
    rc::Rc,
};

use serde_json::Value;
use tracing::{Level, debug, instrument};

use crate::{
    error::Error,
    party::{Party, PartyRef, check_var_names},
    role::Role,
    session::Session,
    visualiser::{
        MessageVariables, NameMapping, NoopVisualiser, RoleValues, SubroutineInputs, Variables,
        Visualiser,
    },
};

/// The name of protocols that do not override [`Protocol::name`].
pub const DEFAULT_PROTOCOL_NAME: &str = "[Default Protocol Name]";

/// The output values of a protocol, for every role that is local.
pub type Outputs<R> = HashMap<R, Variables>;

/// Variable names of one level mapped to variable names of another, per role.
pub type VariableMapping<'a, R> = HashMap<R, HashMap<&'a str, &'a str>>;

/// A multi-party protocol with a fixed set of roles.
pub trait Protocol {
    /// The roles of the protocol.
    type Role: Role;

    /// A descriptive name, used for visualisation and logging.
    fn name(&self) -> &str {
        DEFAULT_PROTOCOL_NAME
    }

    /// The variables each role must be given before the protocol runs.
    fn input_variables(&self) -> HashMap<Self::Role, Vec<&'static str>>;

    /// The variables each role holds once the protocol has run.
    fn output_variables(&self) -> HashMap<Self::Role, Vec<&'static str>>;

    /// The protocol body.
    fn run(&mut self, ctx: &mut Context<Self::Role>) -> Result<(), Error>;
}

/// The execution state of a protocol: its parties, which of them runs locally and the visualiser.
pub struct Context<R: Role> {
    protocol_name: String,
    parties: Vec<PartyRef>,
    pub(crate) running_party: Option<R>,
    pub(crate) running_simulated: bool,
    broadcasting: bool,
    pub(crate) visualiser: Box<dyn Visualiser>,
}

impl<R: Role> Context<R> {
    /// `parties` must be in the order of [`Role::ALL`].
    pub(crate) fn new(protocol_name: String, parties: Vec<PartyRef>) -> Self {
        Self {
            protocol_name,
            parties,
            running_party: None,
            running_simulated: true,
            broadcasting: false,
            visualiser: Box::new(NoopVisualiser),
        }
    }

    /// The name of the protocol being executed.
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// The party playing `role`.
    pub fn party(&self, role: R) -> PartyRef {
        Rc::clone(&self.parties[role.index()])
    }

    /// The role running in this process, if the protocol runs distributed.
    pub fn running_party(&self) -> Option<R> {
        self.running_party
    }

    /// Whether all parties are simulated in this process.
    pub fn is_running_simulated(&self) -> bool {
        self.running_simulated
    }

    /// Whether the party playing `role` executes in this process.
    pub fn is_local(&self, role: R) -> bool {
        self.parties[role.index()].borrow().is_local()
    }

    /// The role played by `party` in this protocol.
    pub fn get_name_of_party(&self, party: &PartyRef) -> Option<R> {
        R::ALL
            .iter()
            .copied()
            .find(|role| Rc::ptr_eq(&self.parties[role.index()], party))
    }

    /// Reads a variable of the party playing `role`.
    pub fn get_variable(&self, role: R, name: &str) -> Result<Value, Error> {
        self.parties[role.index()].borrow().get_variable(name)
    }

    /// Adds a free-text comment to the visualisation.
    pub fn add_comment(&mut self, comment: &str) {
        self.visualiser.add_step(comment);
    }

    /// Runs `computation` on the party playing `role` and stores its results under `names`.
    ///
    /// Does nothing if the party is not local.
    pub fn compute<F>(
        &mut self,
        role: R,
        names: &[&str],
        computation: F,
        description: &str,
    ) -> Result<(), Error>
    where
        F: FnOnce(&Party) -> Result<Vec<Value>, Error>,
    {
        check_var_names(names)?;
        let party = self.party(role);
        if !party.borrow().is_local() {
            return Ok(());
        }
        party
            .borrow_mut()
            .run_computation(names, computation, description)?;

        let party = party.borrow();
        let computed = names
            .iter()
            .map(|name| Ok((name.to_string(), party.get_variable(name)?)))
            .collect::<Result<Variables, Error>>()?;
        self.visualiser
            .add_computation(role.name(), &computed, description);
        Ok(())
    }

    /// Transfers `names` from `sender` to `receiver`.
    ///
    /// Afterwards the receiver can use the variables in its computations.
    pub fn send_variables(&mut self, sender: R, receiver: R, names: &[&str]) -> Result<(), Error> {
        check_var_names(names)?;
        let sending = self.party(sender);
        let receiving = self.party(receiver);
        let sender_local = sending.borrow().is_local();
        let receiver_local = receiving.borrow().is_local();

        let mut values: MessageVariables = names.iter().map(|n| (n.to_string(), None)).collect();
        if sender_local {
            let endpoint = receiving.borrow().endpoint();
            let mut sending = sending.borrow_mut();
            sending.send_variables(&endpoint, names)?;
            for name in names {
                values.insert(name.to_string(), Some(sending.get_variable(name)?));
            }
        }
        if receiver_local {
            let endpoint = sending.borrow().endpoint();
            let mut receiving = receiving.borrow_mut();
            receiving.receive_variables(sender.name(), &endpoint, names)?;
            if !sender_local {
                for name in names {
                    // values that did not arrive stay unknown
                    if let Ok(value) = receiving.get_variable(name) {
                        values.insert(name.to_string(), Some(value));
                    }
                }
            }
        }

        if !self.broadcasting {
            self.visualiser
                .send_message(sender.name(), receiver.name(), &values);
        }
        Ok(())
    }

    /// Transfers `names` from `sender` to every other party.
    ///
    /// Reported to the visualiser as a single broadcast instead of one message per receiver.
    pub fn broadcast_variables(&mut self, sender: R, names: &[&str]) -> Result<(), Error> {
        check_var_names(names)?;
        let sending = self.party(sender);
        self.broadcasting = true;
        let fan_out = R::ALL
            .iter()
            .copied()
            .filter(|receiver| !Rc::ptr_eq(&self.parties[receiver.index()], &sending))
            .collect::<Vec<_>>()
            .into_iter()
            .try_for_each(|receiver| self.send_variables(sender, receiver, names));
        self.broadcasting = false;
        fan_out?;

        let sending = sending.borrow();
        let values: MessageVariables = names
            .iter()
            .map(|name| {
                let value = match sending.is_local() {
                    true => Some(sending.get_variable(name)?),
                    false => None,
                };
                Ok((name.to_string(), value))
            })
            .collect::<Result<_, Error>>()?;
        self.visualiser.broadcast_variable(sender.name(), &values);
        Ok(())
    }

    /// Runs `protocol` as part of this protocol.
    ///
    /// - `role_assignments` binds every role of the subroutine to a party, usually obtained
    ///   through [`Context::party`].
    /// - `inputs` maps, per subroutine role, each subroutine input variable to the outer variable
    ///   providing its value.
    /// - `output_vars` maps, per subroutine role, each subroutine output variable to the outer
    ///   variable it is stored in.
    ///
    /// Inputs and outputs are only transferred for local parties.
    #[instrument(level = Level::DEBUG, skip_all, fields(subroutine = protocol.name()), err)]
    pub fn run_subroutine_protocol<Q: Protocol>(
        &mut self,
        protocol: Q,
        role_assignments: HashMap<Q::Role, PartyRef>,
        inputs: &VariableMapping<'_, Q::Role>,
        output_vars: &VariableMapping<'_, Q::Role>,
    ) -> Result<(), Error> {
        let mut sub = Session::with_parties(protocol, role_assignments)?;
        let name = sub.name().to_string();
        let roles: BTreeMap<String, String> = Q::Role::ALL
            .iter()
            .map(|role| (role.name().to_string(), self.outer_name(&sub.party(*role))))
            .collect();
        let output_plan = name_mapping(output_vars);
        self.visualiser.start_subroutine(
            &name,
            &roles,
            SubroutineInputs::Plan(&name_mapping(inputs)),
            &output_plan,
        );

        // gathered before entering the subroutine, afterwards the outer variables are hidden
        let mut input_values: HashMap<Q::Role, Vec<(String, Value)>> = HashMap::new();
        for (role, mapping) in inputs {
            let party = sub.party(*role);
            let party = party.borrow();
            if !party.is_local() {
                continue;
            }
            let values = input_values.entry(*role).or_default();
            for (inner, outer) in mapping {
                values.push((inner.to_string(), party.get_variable(outer)?));
            }
        }

        for role in Q::Role::ALL {
            sub.party(*role)
                .borrow_mut()
                .start_subroutine_protocol(&name);
        }
        let outcome = self.run_entered_subroutine(&mut sub, &roles, input_values, &output_plan);
        for role in Q::Role::ALL {
            sub.party(*role).borrow_mut().end_subroutine_protocol();
        }
        let outputs = outcome?;

        // every output needs a valid outer name before any outer variable is written
        let mut writes = Vec::new();
        for (role, vars) in &outputs {
            for (inner, value) in vars {
                let outer = output_vars
                    .get(role)
                    .and_then(|mapping| mapping.get(inner.as_str()))
                    .ok_or_else(|| Error::MissingOutputMapping {
                        role: role.name().to_string(),
                        variable: inner.clone(),
                    })?;
                check_var_names(&[outer])?;
                writes.push((*role, *outer, value.clone()));
            }
        }
        for (role, outer, value) in writes {
            sub.party(role)
                .borrow_mut()
                .set_local_variable(outer, value)?;
        }

        let output_values: RoleValues = outputs
            .into_iter()
            .map(|(role, vars)| (role.name().to_string(), vars))
            .collect();
        self.visualiser.end_subroutine(&output_values);
        debug!("subroutine {name} finished");
        Ok(())
    }

    /// Runs a subroutine whose parties have already entered its namespace.
    fn run_entered_subroutine<Q: Protocol>(
        &mut self,
        sub: &mut Session<Q>,
        roles: &BTreeMap<String, String>,
        input_values: HashMap<Q::Role, Vec<(String, Value)>>,
        output_plan: &NameMapping,
    ) -> Result<Outputs<Q::Role>, Error> {
        let realized: RoleValues = input_values
            .iter()
            .map(|(role, vars)| (role.name().to_string(), vars.iter().cloned().collect()))
            .collect();
        sub.set_input(input_values)?;

        if let Some(running) = self.running_party {
            let local = &self.parties[running.index()];
            sub.context.running_party = Q::Role::ALL
                .iter()
                .copied()
                .find(|role| Rc::ptr_eq(&sub.party(*role), local));
            sub.context.running_simulated = false;
        }

        self.visualiser.start_subroutine(
            sub.name(),
            roles,
            SubroutineInputs::Values(&realized),
            output_plan,
        );
        sub.context.visualiser = mem::replace(&mut self.visualiser, Box::new(NoopVisualiser));
        let outcome = sub.run().and_then(|()| sub.get_output());
        self.visualiser = mem::replace(&mut sub.context.visualiser, Box::new(NoopVisualiser));
        outcome
    }

    /// The role name of `party` in this protocol, or the party's own name if it plays none.
    fn outer_name(&self, party: &PartyRef) -> String {
        match self.get_name_of_party(party) {
            Some(role) => role.name().to_string(),
            None => party.borrow().name().to_string(),
        }
    }
}

fn name_mapping<R: Role>(mapping: &VariableMapping<'_, R>) -> NameMapping {
    mapping
        .iter()
        .map(|(role, names)| {
            let names = names
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect();
            (role.name().to_string(), names)
        })
        .collect()
}
