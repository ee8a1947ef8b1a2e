//! Module containing `serde` serialization helpers.

use serde::{
    de::{Deserialize, Deserializer, Error},
    ser::{Serialize, Serializer},
};
use std::marker::PhantomData;
use typenum::Unsigned;

/// A format version identifier that refuses to deserialize snapshots written
/// by an incompatible version of this crate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Version<T>(PhantomData<T>);

impl<T> Version<T>
where
    T: Unsigned,
{
    /// The version number value required for serializing and deserializing.
    pub const VALUE: u32 = T::U32;
}

impl<T> Serialize for Version<T>
where
    T: Unsigned,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u32::serialize(&Self::VALUE, serializer)
    }
}

impl<'de, T> Deserialize<'de> for Version<T>
where
    T: Unsigned,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = u32::deserialize(deserializer)?;
        if Self::VALUE == version {
            Ok(Default::default())
        } else {
            Err(D::Error::custom(format!(
                "invalid version '{}', expected '{}'",
                version,
                Self::VALUE,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typenum::{U1, U2};

    #[test]
    fn version_roundtrip() {
        let bytes = bincode::serialize(&Version::<U2>::default()).unwrap();
        assert!(bincode::deserialize::<Version<U2>>(&bytes).is_ok());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let bytes = bincode::serialize(&Version::<U1>::default()).unwrap();
        assert!(bincode::deserialize::<Version<U2>>(&bytes).is_err());
    }
}
