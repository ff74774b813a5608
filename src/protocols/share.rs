//! Additive secret sharing among three parties.

use std::collections::HashMap;

use serde_json::json;

use super::{DEFAULT_MODULUS, as_u64, sub_mod};
use crate::{
    error::Error,
    protocol::{Context, Protocol},
    roles,
};

roles! {
    /// The roles of [`SecretShare`].
    pub enum ShareRole {
        /// Holds the secret and keeps one share of it.
        Dealer => "dealer",
        /// Receives the first share.
        First => "holder_1",
        /// Receives the second share.
        Second => "holder_2",
    }
}

/// Splits the dealer's `secret` into three random shares that add up to it modulo
/// [`SecretShare::modulus`]. Every role outputs its `share`.
#[derive(Debug, Clone)]
pub struct SecretShare {
    modulus: u64,
}

impl SecretShare {
    /// Shares modulo `modulus`, which must be at least 1.
    pub fn new(modulus: u64) -> Self {
        Self {
            modulus: modulus.max(1),
        }
    }

    /// The public modulus.
    pub fn modulus(&self) -> u64 {
        self.modulus
    }
}

impl Default for SecretShare {
    fn default() -> Self {
        Self::new(DEFAULT_MODULUS)
    }
}

impl Protocol for SecretShare {
    type Role = ShareRole;

    fn name(&self) -> &str {
        "Additive Secret Sharing"
    }

    fn input_variables(&self) -> HashMap<ShareRole, Vec<&'static str>> {
        HashMap::from([(ShareRole::Dealer, vec!["secret"])])
    }

    fn output_variables(&self) -> HashMap<ShareRole, Vec<&'static str>> {
        HashMap::from([
            (ShareRole::Dealer, vec!["share"]),
            (ShareRole::First, vec!["share"]),
            (ShareRole::Second, vec!["share"]),
        ])
    }

    fn run(&mut self, ctx: &mut Context<ShareRole>) -> Result<(), Error> {
        let m = self.modulus;
        ctx.compute(
            ShareRole::Dealer,
            &["share", "share_1", "share_2"],
            |p| {
                let secret = as_u64(p.get_variable("secret")?)? % m;
                let share_1 = rand::random_range(0..m);
                let share_2 = rand::random_range(0..m);
                let share = sub_mod(sub_mod(secret, share_1, m), share_2, m);
                Ok(vec![json!(share), json!(share_1), json!(share_2)])
            },
            "split the secret into random shares",
        )?;
        ctx.send_variables(ShareRole::Dealer, ShareRole::First, &["share_1"])?;
        ctx.send_variables(ShareRole::Dealer, ShareRole::Second, &["share_2"])?;
        ctx.compute(
            ShareRole::First,
            &["share"],
            |p| Ok(vec![p.get_variable("share_1")?]),
            "keep the received share",
        )?;
        ctx.compute(
            ShareRole::Second,
            &["share"],
            |p| Ok(vec![p.get_variable("share_2")?]),
            "keep the received share",
        )?;
        ctx.add_comment(&format!(
            "the shares add up to the secret modulo {m}, each one alone is uniformly random"
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Session, protocols::add_mod};

    #[test]
    fn shares_reconstruct_the_secret() {
        let protocol = SecretShare::new(1000);
        let m = protocol.modulus();
        let mut session = Session::new(protocol);
        session
            .set_input([(ShareRole::Dealer, [("secret", json!(1234))])])
            .unwrap();
        session.run().unwrap();
        let output = session.get_output().unwrap();
        let total = output
            .values()
            .map(|vars| as_u64(vars["share"].clone()).unwrap())
            .fold(0, |acc, share| add_mod(acc, share, m));
        assert_eq!(output.len(), 3);
        assert_eq!(total, 234);
    }

    #[test]
    fn non_integer_secret_is_rejected() {
        let mut session = Session::new(SecretShare::default());
        session
            .set_input([(ShareRole::Dealer, [("secret", json!("abc"))])])
            .unwrap();
        assert!(matches!(session.run(), Err(Error::Json(_))));
    }
}
