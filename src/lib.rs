//! A simulator for secure multi-party computation (SMPC) protocols.
//!
//! Protocols are written once as a sequence of local computations and variable transfers between
//! named parties. The same protocol can then be executed in two ways:
//!
//! - simulated, with all parties in a single process exchanging variables in memory, or
//! - distributed, with one process per party exchanging variables over TCP.
//!
//! Every step is reported to a [`Visualiser`], which hosting applications use to display or
//! record the execution.
//!
//! ## Main Components
//!
//! * [`Protocol`]: declares roles, inputs and outputs, and the body of a protocol.
//! * [`Context`]: the operations available to a protocol body (compute, send, broadcast and
//!   running other protocols as subroutines).
//! * [`Session`]: binds a protocol to parties, assigns inputs, runs it and collects outputs.
//! * [`Party`] and [`transport`]: the participants and the way they exchange variables.
//! * [`protocols`]: ready-made protocols, [`protocols::SecretShare`] and
//!   [`protocols::SecureSum`].
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//!
//! use smpc_sim::{Context, Error, Protocol, Session, json, roles};
//!
//! roles! {
//!     /// The two parties.
//!     pub enum Pair {
//!         /// Holds the input.
//!         Alice => "alice",
//!         /// Learns the doubled input.
//!         Bob => "bob",
//!     }
//! }
//!
//! struct Double;
//!
//! impl Protocol for Double {
//!     type Role = Pair;
//!
//!     fn input_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
//!         HashMap::from([(Pair::Alice, vec!["a"])])
//!     }
//!
//!     fn output_variables(&self) -> HashMap<Pair, Vec<&'static str>> {
//!         HashMap::from([(Pair::Bob, vec!["b"])])
//!     }
//!
//!     fn run(&mut self, ctx: &mut Context<Pair>) -> Result<(), Error> {
//!         ctx.compute(
//!             Pair::Alice,
//!             &["b"],
//!             |p| {
//!                 let a = p.get_variable("a")?.as_i64().unwrap_or_default();
//!                 Ok(vec![json!(2 * a)])
//!             },
//!             "double a",
//!         )?;
//!         ctx.send_variables(Pair::Alice, Pair::Bob, &["b"])
//!     }
//! }
//!
//! # fn main() -> Result<(), Error> {
//! let mut session = Session::new(Double);
//! session.set_input([(Pair::Alice, [("a", json!(21))])])?;
//! session.run()?;
//! let output = session.get_output()?;
//! assert_eq!(output[&Pair::Bob]["b"], json!(42));
//! # Ok(())
//! # }
//! ```
//!
//! To run the same protocol distributed, each process creates its own session and calls
//! [`Session::set_party_addresses`] (or [`Session::configure_network`]) with the addresses of all
//! parties and the party it executes, before running the protocol.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use serde_json::{Value, json};

pub mod config;
pub mod protocols;
pub mod transport;
pub mod visualiser;

mod error;
mod party;
mod protocol;
mod role;
mod session;

pub use config::{NetworkConfig, TransportConfig};
pub use error::Error;
pub use party::{Party, PartyRef, RESERVED_PREFIX, Statistics, check_var_names, to_value};
pub use protocol::{Context, DEFAULT_PROTOCOL_NAME, Outputs, Protocol, VariableMapping};
pub use role::Role;
pub use session::Session;
pub use transport::{Address, Transport};
pub use visualiser::{EventLog, NoopVisualiser, TracingVisualiser, Visualiser};
