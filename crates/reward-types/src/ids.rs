use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name([u8; 16]);

        impl $name {
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), hex::encode(self.0))
            }
        }
    };
}

id_type!(
    /// Identity of a user account.
    AccountId,
    "acct_"
);
id_type!(
    /// Identity of a catalog product.
    ProductId,
    "prod_"
);
id_type!(
    /// Identity of a daily task session.
    SessionId,
    "sess_"
);

impl AccountId {
    /// Well-known counterparty for platform-funded credits and debits
    /// (task settlements, deposits, withdrawals).
    pub fn platform() -> Self {
        Self([0xFF; 16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let acct = AccountId::from_bytes([1; 16]);
        assert!(acct.to_string().starts_with("acct_"));
        let prod = ProductId::from_bytes([2; 16]);
        assert!(prod.to_string().starts_with("prod_"));
    }

    #[test]
    fn test_platform_is_stable() {
        assert_eq!(AccountId::platform(), AccountId::platform());
        assert_ne!(AccountId::platform(), AccountId::from_bytes([0; 16]));
    }
}
