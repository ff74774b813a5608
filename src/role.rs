//! Closed sets of party roles, one per protocol.

use std::{fmt::Debug, hash::Hash};

/// The roles of a protocol.
///
/// Usually generated with [`roles!`](crate::roles), which turns a typo in a role into a compile
/// error instead of a runtime lookup failure.
pub trait Role: Copy + Eq + Hash + Debug + 'static {
    /// All roles in canonical order.
    const ALL: &'static [Self];

    /// The role's name as shown to visualisers and used in configuration files.
    fn name(self) -> &'static str;

    /// The position of the role in [`Role::ALL`].
    fn index(self) -> usize;

    /// Looks up a role by its name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| role.name() == name)
    }
}

/// Declares a role enum and implements [`Role`](crate::Role) for it.
///
/// ```
/// smpc_sim::roles! {
///     /// The two parties of an oblivious transfer.
///     pub enum OtRole {
///         /// Holds the two messages.
///         Sender => "sender",
///         /// Learns one of them.
///         Receiver => "receiver",
///     }
/// }
///
/// use smpc_sim::Role;
/// assert_eq!(OtRole::Receiver.name(), "receiver");
/// assert_eq!(OtRole::from_name("sender"), Some(OtRole::Sender));
/// assert_eq!(OtRole::ALL.len(), 2);
/// ```
#[macro_export]
macro_rules! roles {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $role:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $crate::Role for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $role),+
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}
