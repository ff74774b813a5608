//! Binding a [`Protocol`] to concrete parties and running it.

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use serde_json::Value;
use tracing::{Level, debug, info, instrument};

use crate::{
    config::{NetworkConfig, TransportConfig},
    error::Error,
    party::{Party, PartyRef, Statistics, check_var_names},
    protocol::{Context, Outputs, Protocol},
    role::Role,
    transport::Endpoint,
    visualiser::{Variables, Visualiser},
};

/// A protocol together with the parties executing it.
///
/// A session starts out simulated: all parties live in this process and exchange variables in
/// memory. [`Session::set_party_addresses`] (or [`Session::configure_network`]) switches it to a
/// distributed run in which this process only executes one party.
pub struct Session<P: Protocol> {
    protocol: P,
    pub(crate) context: Context<P::Role>,
}

impl<P: Protocol> Session<P> {
    /// Creates a session with one fresh party per role, using the default transport settings.
    pub fn new(protocol: P) -> Self {
        Self::with_config(protocol, TransportConfig::default())
    }

    /// Creates a session with one fresh party per role.
    pub fn with_config(protocol: P, config: TransportConfig) -> Self {
        let parties = P::Role::ALL
            .iter()
            .map(|role| Party::new(role.name(), config.clone()).into_ref())
            .collect();
        let context = Context::new(protocol.name().to_string(), parties);
        Self { protocol, context }
    }

    /// Creates a session on existing parties, typically those of an enclosing protocol.
    ///
    /// Every role must be assigned a party; one party may play several roles.
    pub fn with_parties(
        protocol: P,
        mut role_assignments: HashMap<P::Role, PartyRef>,
    ) -> Result<Self, Error> {
        let mut parties = Vec::with_capacity(P::Role::ALL.len());
        for role in P::Role::ALL {
            match role_assignments.remove(role) {
                Some(party) => parties.push(party),
                None => {
                    return Err(Error::IncompleteRoleAssignment {
                        protocol: protocol.name().to_string(),
                    });
                }
            }
        }
        let context = Context::new(protocol.name().to_string(), parties);
        Ok(Self { protocol, context })
    }

    /// The name of the protocol.
    pub fn name(&self) -> &str {
        self.protocol.name()
    }

    /// The protocol.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// The execution context, as seen by the protocol body.
    pub fn context(&self) -> &Context<P::Role> {
        &self.context
    }

    /// The party playing `role`.
    pub fn party(&self, role: P::Role) -> PartyRef {
        self.context.party(role)
    }

    /// Looks up a role by name, failing with [`Error::NonExistentParty`] for unknown names.
    pub fn role(&self, name: &str) -> Result<P::Role, Error> {
        P::Role::from_name(name).ok_or_else(|| Error::NonExistentParty {
            protocol: self.name().to_string(),
            party: name.to_string(),
        })
    }

    /// Replaces the visualiser that is notified of every step.
    pub fn set_visualiser(&mut self, visualiser: impl Visualiser + 'static) {
        self.context.visualiser = Box::new(visualiser);
    }

    /// Switches to a distributed run in which this process executes `local_party`.
    ///
    /// Assigns the given addresses, starts listening on the local party's address and waits up to
    /// `timeout` for every other party to accept a connection. Fails with
    /// [`Error::MissingAddress`] before changing anything if `local_party` has no address.
    #[instrument(level = Level::DEBUG, skip_all, fields(local = local_party.name()), err)]
    pub fn set_party_addresses(
        &mut self,
        addresses: &HashMap<P::Role, String>,
        local_party: P::Role,
        timeout: Duration,
    ) -> Result<(), Error> {
        if !addresses.contains_key(&local_party) {
            return Err(Error::MissingAddress(local_party.name().to_string()));
        }
        self.context.running_simulated = false;
        for (role, address) in addresses {
            self.party(*role)
                .borrow_mut()
                .transport_mut()
                .set_address(address)?;
        }
        self.context.running_party = Some(local_party);
        for role in P::Role::ALL {
            self.party(*role)
                .borrow_mut()
                .set_running(*role == local_party);
        }

        let peers: Vec<Endpoint> = P::Role::ALL
            .iter()
            .filter(|role| **role != local_party)
            .map(|role| self.party(*role).borrow().endpoint())
            .collect();
        let local = self.party(local_party);
        let mut local = local.borrow_mut();
        let transport = local.transport_mut();
        transport.start_listening()?;
        transport.connect_to_parties(&peers, timeout)?;
        info!(
            "{} runs {} as {}",
            transport.address().map(|a| a.to_string()).unwrap_or_default(),
            self.name(),
            local_party.name()
        );
        Ok(())
    }

    /// Applies a [`NetworkConfig`]: transport settings for every party, then
    /// [`Session::set_party_addresses`] with the configured addresses and local party.
    pub fn configure_network(&mut self, config: &NetworkConfig) -> Result<(), Error> {
        let local = self.role(&config.local_party)?;
        let mut addresses = HashMap::with_capacity(config.addresses.len());
        for (name, address) in &config.addresses {
            addresses.insert(self.role(name)?, address.clone());
        }
        for role in P::Role::ALL {
            self.party(*role)
                .borrow_mut()
                .transport_mut()
                .set_config(config.transport.clone());
        }
        self.set_party_addresses(&addresses, local, config.connect_timeout())
    }

    /// Assigns the protocol inputs.
    ///
    /// Every role given must receive exactly the variables the protocol declares for it. All
    /// roles are validated before any variable is assigned.
    pub fn set_input<I, V, K>(&mut self, inputs: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (P::Role, V)>,
        V: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let declared_inputs = self.protocol.input_variables();
        let inputs: Vec<(P::Role, Vec<(String, Value)>)> = inputs
            .into_iter()
            .map(|(role, vars)| {
                let vars = vars.into_iter().map(|(k, v)| (k.into(), v)).collect();
                (role, vars)
            })
            .collect();

        for (role, vars) in &inputs {
            let declared: BTreeSet<&str> = declared_inputs
                .get(role)
                .map(|names| names.iter().copied().collect())
                .unwrap_or_default();
            let given: BTreeSet<&str> = vars.iter().map(|(name, _)| name.as_str()).collect();
            if declared != given {
                return Err(Error::InvalidProtocolInput {
                    party: role.name().to_string(),
                    missing: declared.difference(&given).map(|s| s.to_string()).collect(),
                    unexpected: given.difference(&declared).map(|s| s.to_string()).collect(),
                });
            }
            check_var_names(&given.into_iter().collect::<Vec<_>>())?;
        }

        for (role, vars) in inputs {
            let party = self.party(role);
            let mut party = party.borrow_mut();
            for (name, value) in vars {
                party.set_local_variable(&name, value)?;
            }
        }
        Ok(())
    }

    /// Runs the protocol body.
    #[instrument(level = Level::DEBUG, skip_all, fields(protocol = self.protocol.name()), err)]
    pub fn run(&mut self) -> Result<(), Error> {
        self.protocol.run(&mut self.context)?;
        debug!("protocol finished");
        Ok(())
    }

    /// Collects the declared outputs of every local party.
    ///
    /// Roles whose party runs in another process are omitted.
    pub fn get_output(&self) -> Result<Outputs<P::Role>, Error> {
        let mut outputs = HashMap::new();
        for (role, names) in self.protocol.output_variables() {
            check_var_names(&names)?;
            let party = self.party(role);
            let party = party.borrow();
            if !party.is_local() {
                continue;
            }
            let values = names
                .iter()
                .map(|name| Ok((name.to_string(), party.get_variable(name)?)))
                .collect::<Result<Variables, Error>>()?;
            outputs.insert(role, values);
        }
        Ok(outputs)
    }

    /// The statistics of every party.
    pub fn get_party_statistics(&self) -> HashMap<P::Role, Statistics> {
        P::Role::ALL
            .iter()
            .map(|role| (*role, self.party(*role).borrow().get_statistics()))
            .collect()
    }

    /// The statistics of all parties combined.
    pub fn get_total_statistics(&self) -> Statistics {
        P::Role::ALL
            .iter()
            .map(|role| self.party(*role).borrow().get_statistics())
            .fold(Statistics::default(), |total, stats| total + stats)
    }

    /// Shuts down the transports of all parties.
    ///
    /// Only for the hosting application: a protocol body must not call this, since the parties
    /// may still be in use by an enclosing protocol.
    pub fn terminate_protocol(&mut self) {
        for role in P::Role::ALL {
            self.party(*role).borrow_mut().exit_protocol();
        }
    }
}
