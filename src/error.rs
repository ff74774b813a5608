//! The errors raised by parties, transports and protocols.

use std::time::Duration;

use crate::transport::wire::FrameError;

/// A custom error type for protocol execution and communication.
///
/// Every error is raised at the call that caused it and is never retried; the hosting application
/// (or the protocol body) decides whether to abort.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inputs given to a role do not match its declared input variables.
    #[error(
        "invalid input for party '{party}': missing variables {missing:?}, unexpected variables {unexpected:?}"
    )]
    InvalidProtocolInput {
        /// The role the input was provided for.
        party: String,
        /// Declared input variables that were not provided.
        missing: Vec<String>,
        /// Provided variables that are not declared inputs.
        unexpected: Vec<String>,
    },
    /// A variable name uses the reserved `_` prefix.
    #[error("invalid variable name '{0}': names starting with '_' are reserved")]
    InvalidVariableName(String),
    /// The party name is not one of the roles of the protocol.
    #[error("protocol '{protocol}' has no party named '{party}'")]
    NonExistentParty {
        /// The protocol the party was looked up in.
        protocol: String,
        /// The unknown party name.
        party: String,
    },
    /// The variable was never set in the party's current namespace.
    #[error("party '{party}' has no variable '{variable}'")]
    NonExistentVariable {
        /// The party whose namespace was searched.
        party: String,
        /// The missing variable.
        variable: String,
    },
    /// A variable of a party that is not running in this process was read.
    #[error("party '{party}' is not local, its variable '{variable}' cannot be accessed")]
    InvalidLocalVariableAccess {
        /// The remote party.
        party: String,
        /// The variable that was accessed.
        variable: String,
    },
    /// A computation returned a different number of values than variables it should populate.
    #[error("computation returned {actual} values, but {expected} variables should be set")]
    DimensionMismatch {
        /// The number of variable names.
        expected: usize,
        /// The number of returned values.
        actual: usize,
    },
    /// No connection could be established before the timeout elapsed.
    #[error("unable to connect to {address} within {timeout:?}")]
    UnableToConnect {
        /// The address that could not be reached.
        address: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A variable was read that was expected from another party, but never arrived.
    #[error("party '{party}' did not receive variable '{variable}' from '{sender}'")]
    VariableNotReceived {
        /// The receiving party.
        party: String,
        /// The variable that did not arrive.
        variable: String,
        /// The party that should have sent it.
        sender: String,
    },
    /// An address is not of the form `ip:port`.
    #[error("invalid address '{0}', expected 'ip:port'")]
    InvalidAddress(String),
    /// A distributed run was configured without an address for the party running locally.
    #[error("no address given for local party '{0}'")]
    MissingAddress(String),
    /// A networked send was attempted to an address without an open connection.
    #[error("no open connection to {0}")]
    NotConnected(String),
    /// A subroutine was given a role assignment that does not cover every role exactly once.
    #[error("a party must be provided for every role of protocol '{protocol}'")]
    IncompleteRoleAssignment {
        /// The subroutine protocol.
        protocol: String,
    },
    /// A subroutine produced an output for which the caller supplied no outer variable name.
    #[error("no outer name given for output '{variable}' of role '{role}'")]
    MissingOutputMapping {
        /// The subroutine role.
        role: String,
        /// The subroutine output variable.
        variable: String,
    },
    /// A wire frame could not be encoded or decoded.
    #[error("wire format error: {0}")]
    Wire(#[from] FrameError),
    /// A socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A value could not be converted to or from JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
