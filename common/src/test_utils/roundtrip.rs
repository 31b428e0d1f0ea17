//! Serde / string roundtrip proptest helpers.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use proptest::arbitrary::Arbitrary;
use proptest::test_runner::Config;
use proptest::{prop_assert_eq, proptest};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Quickly create a roundtrip proptest for a type which impls
/// [`FromStr`] + [`Display`].
pub fn fromstr_display_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + FromStr + Display,
    <T as FromStr>::Err: Debug,
{
    proptest!(|(value1: T)| {
        let string = value1.to_string();
        let value2 = T::from_str(&string).unwrap();
        prop_assert_eq!(&value1, &value2);
    });
}

/// Quickly create a json string roundtrip proptest, for types which
/// serialize to a json string.
pub fn json_string_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    proptest!(|(value1: T)| {
        let json = serde_json::to_string(&value1).unwrap();
        let value2 = serde_json::from_str::<T>(&json).unwrap();
        prop_assert_eq!(&value1, &value2);
    });
}

/// Quickly create a [`serde_json::Value`] canonical roundtrip proptest. This
/// proptest verifies that `T` semi-canonically roundtrips to/from json,
/// though it uses [`serde_json::Value`] as the serialized representation,
/// rather than the standard json string, so that object key order doesn't
/// affect the comparison.
pub fn json_value_canonical_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    proptest!(Config::default(), |(value1: T)| {
        let json_value1 = serde_json::to_value(&value1).unwrap();
        let value2 = serde_json::from_value::<T>(json_value1.clone()).unwrap();
        let json_value2 = serde_json::to_value(&value2).unwrap();

        prop_assert_eq!(&value1, &value2);
        prop_assert_eq!(&json_value1, &json_value2);
    });
}
