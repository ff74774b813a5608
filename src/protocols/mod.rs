//! Ready-made protocols built on the simulator.
//!
//! They double as usage examples: [`SecretShare`] shows local computations and point-to-point
//! sends, [`SecureSum`] composes it as a subroutine and broadcasts.

mod share;
mod sum;

use serde_json::Value;

use crate::error::Error;

pub use share::{SecretShare, ShareRole};
pub use sum::{SecureSum, SumRole};

/// The default public modulus for share arithmetic.
pub const DEFAULT_MODULUS: u64 = 1 << 32;

/// Reads a non-negative integer variable.
fn as_u64(value: Value) -> Result<u64, Error> {
    Ok(serde_json::from_value(value)?)
}

/// `(a + b) mod m`, for operands already reduced modulo `m`.
fn add_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 + b as u128) % m as u128) as u64
}

/// `(a - b) mod m`, for operands already reduced modulo `m`.
fn sub_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 + m as u128 - b as u128) % m as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modular_arithmetic_wraps() {
        assert_eq!(add_mod(7, 5, 10), 2);
        assert_eq!(sub_mod(3, 5, 10), 8);
        assert_eq!(add_mod(u64::MAX - 1, 1, u64::MAX), 0);
        assert_eq!(sub_mod(0, u64::MAX - 1, u64::MAX), 1);
    }
}
