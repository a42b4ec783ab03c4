use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::util::errors::{Result, StdError};

/// Hex encoded sha256 of the JSON form of `value`.
///
/// Callers hash `BTreeMap`s and structs only, so the serialized form and thus the
/// digest is stable across passes and processes.
pub fn object_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(StdError::JsonSerializationError)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn hash_is_stable_for_equal_maps() {
        let mut a = BTreeMap::new();
        a.insert("GlancePassword", "12345678");
        a.insert("GlanceDatabasePassword", "abcdefgh");

        let mut b = BTreeMap::new();
        b.insert("GlanceDatabasePassword", "abcdefgh");
        b.insert("GlancePassword", "12345678");

        let ha = object_hash(&a).unwrap();
        assert_eq!(ha, object_hash(&b).unwrap());
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn hash_changes_with_content() {
        let a = object_hash(&("foo", "bar")).unwrap();
        let b = object_hash(&("foo", "baz")).unwrap();
        assert_ne!(a, b);
    }
}
