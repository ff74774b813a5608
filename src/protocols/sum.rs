//! Summing private inputs of three parties without revealing them.

use std::collections::HashMap;

use serde_json::json;

use super::{DEFAULT_MODULUS, SecretShare, ShareRole, add_mod, as_u64};
use crate::{
    error::Error,
    protocol::{Context, Protocol},
    role::Role,
    roles,
};

roles! {
    /// The roles of [`SecureSum`].
    pub enum SumRole {
        /// The first input holder.
        Alice => "alice",
        /// The second input holder.
        Bob => "bob",
        /// The third input holder.
        Carol => "carol",
    }
}

/// Every party learns the sum of all inputs `x` modulo [`SecureSum::modulus`] as `sum`, and
/// nothing else about the other inputs.
#[derive(Debug, Clone)]
pub struct SecureSum {
    modulus: u64,
}

impl SecureSum {
    /// Sums modulo `modulus`, which must be at least 1.
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

impl Default for SecureSum {
    fn default() -> Self {
        Self::new(DEFAULT_MODULUS)
    }
}

impl Protocol for SecureSum {
    type Role = SumRole;

    fn name(&self) -> &str {
        "Secure Sum"
    }

    fn input_variables(&self) -> HashMap<SumRole, Vec<&'static str>> {
        SumRole::ALL.iter().map(|role| (*role, vec!["x"])).collect()
    }

    fn output_variables(&self) -> HashMap<SumRole, Vec<&'static str>> {
        SumRole::ALL.iter().map(|role| (*role, vec!["sum"])).collect()
    }

    fn run(&mut self, ctx: &mut Context<SumRole>) -> Result<(), Error> {
        let m = self.modulus;
        let share_names: Vec<String> = SumRole::ALL
            .iter()
            .map(|dealer| format!("share_of_{}", dealer.name()))
            .collect();

        ctx.add_comment("every party secret-shares its input");
        for (dealer, share_name) in SumRole::ALL.iter().zip(&share_names) {
            let (first, second) = match dealer {
                SumRole::Alice => (SumRole::Bob, SumRole::Carol),
                SumRole::Bob => (SumRole::Alice, SumRole::Carol),
                SumRole::Carol => (SumRole::Alice, SumRole::Bob),
            };
            let assignments = HashMap::from([
                (ShareRole::Dealer, ctx.party(*dealer)),
                (ShareRole::First, ctx.party(first)),
                (ShareRole::Second, ctx.party(second)),
            ]);
            let inputs = HashMap::from([(ShareRole::Dealer, HashMap::from([("secret", "x")]))]);
            let outputs: HashMap<_, _> = ShareRole::ALL
                .iter()
                .map(|role| (*role, HashMap::from([("share", share_name.as_str())])))
                .collect();
            ctx.run_subroutine_protocol(SecretShare::new(m), assignments, &inputs, &outputs)?;
        }

        ctx.add_comment("every party adds up the shares it holds and publishes the result");
        for role in SumRole::ALL {
            let partial = format!("partial_{}", role.name());
            ctx.compute(
                *role,
                &[partial.as_str()],
                |p| {
                    let mut total = 0;
                    for name in &share_names {
                        total = add_mod(total, as_u64(p.get_variable(name)?)?, m);
                    }
                    Ok(vec![json!(total)])
                },
                "add up the shares",
            )?;
            ctx.broadcast_variables(*role, &[partial.as_str()])?;
        }

        ctx.add_comment("every party adds up the partial sums");
        let partial_names: Vec<String> = SumRole::ALL
            .iter()
            .map(|role| format!("partial_{}", role.name()))
            .collect();
        for role in SumRole::ALL {
            ctx.compute(
                *role,
                &["sum"],
                |p| {
                    let mut total = 0;
                    for name in &partial_names {
                        total = add_mod(total, as_u64(p.get_variable(name)?)?, m);
                    }
                    Ok(vec![json!(total)])
                },
                "add up the partial sums",
            )?;
        }
        Ok(())
    }
}
