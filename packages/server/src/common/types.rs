//! Shared plain types and id helpers.
//!
//! Upstream battle and kill-event ids are unsigned 64-bit integers that can
//! exceed both the 53-bit float-safe range and `i64::MAX`. They are carried
//! through the system as `i64` with the bit pattern preserved, and re-emitted
//! as the original unsigned value on the JSON boundary.

use serde::{Deserialize, Deserializer, Serializer};

/// Reinterpret an upstream unsigned id as the `i64` we store.
pub fn u64_to_id(raw: u64) -> i64 {
    raw as i64
}

/// Recover the original unsigned id from a stored `i64`.
pub fn id_to_u64(id: i64) -> u64 {
    id as u64
}

/// Serde deserializer: accept an unsigned 64-bit JSON number, keep all bits.
pub fn de_u64_as_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = u64::deserialize(deserializer)?;
    Ok(u64_to_id(raw))
}

/// Serde serializer: emit the stored id as its original unsigned value.
pub fn ser_i64_as_u64<S>(id: &i64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(id_to_u64(*id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_i64() {
        for raw in [0u64, 1, 42, i64::MAX as u64, i64::MAX as u64 + 1, u64::MAX] {
            assert_eq!(id_to_u64(u64_to_id(raw)), raw);
        }
    }

    #[test]
    fn ids_above_i64_max_deserialize() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "de_u64_as_i64")]
            id: i64,
        }

        let raw = i64::MAX as u64 + 7;
        let wrapper: Wrapper = serde_json::from_str(&format!("{{\"id\":{}}}", raw)).unwrap();
        assert_eq!(id_to_u64(wrapper.id), raw);
    }

    #[test]
    fn ids_serialize_back_as_unsigned() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(serialize_with = "ser_i64_as_u64")]
            id: i64,
        }

        let raw = u64::MAX - 3;
        let json = serde_json::to_string(&Wrapper { id: u64_to_id(raw) }).unwrap();
        assert_eq!(json, format!("{{\"id\":{}}}", raw));
    }
}
