use alchemy_secret::{decrypt, encrypt, DerivedKey, SecretEnvelope};
use serde_json::{Map, Value};

use crate::error::SerdeError;
use crate::reference::check_no_pending_refs;

pub const SECRET_PLAIN_TAG: &str = "secret-plain";
pub const SECRET_TAG: &str = "secret";

/// Builds the plaintext marker a caller embeds in props for a value that
/// must be encrypted before it reaches a `StateStore`.
pub fn secret_plain_value(plaintext: &str) -> Value {
    serde_json::json!({ "@type": SECRET_PLAIN_TAG, "value": plaintext })
}

fn tag_of(map: &Map<String, Value>) -> Option<&str> {
    map.get("@type").and_then(|v| v.as_str())
}

/// Strips `secret-plain` markers down to their bare plaintext string, for
/// handing a value straight to a provider without ever touching a
/// `StateStore`. Does not touch already-encrypted `secret` envelopes.
pub fn to_plain(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if tag_of(map) == Some(SECRET_PLAIN_TAG) {
                return map
                    .get("value")
                    .cloned()
                    .unwrap_or(Value::Null);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), to_plain(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_plain).collect()),
        other => other.clone(),
    }
}

/// Walks `value`, encrypting every `secret-plain` node into a `secret`
/// envelope. Fails if `value` still contains an unresolved resource
/// reference, or a plaintext secret is found with no key available.
pub fn encode(value: &Value, key: Option<&DerivedKey>) -> Result<Value, SerdeError> {
    check_no_pending_refs(value)?;
    encode_inner(value, key)
}

fn encode_inner(value: &Value, key: Option<&DerivedKey>) -> Result<Value, SerdeError> {
    match value {
        Value::Object(map) => {
            if tag_of(map) == Some(SECRET_PLAIN_TAG) {
                let plaintext = map
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SerdeError::Malformed("secret-plain missing value".into()))?;
                let key = key.ok_or(alchemy_secret::SecretError::KeyMissing)?;
                let envelope = encrypt(plaintext, key);
                return Ok(serde_json::to_value(TaggedEnvelope::from(envelope))
                    .map_err(|e| SerdeError::Malformed(e.to_string()))?);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), encode_inner(v, key)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| encode_inner(v, key))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// Walks `value`, decrypting every `secret` envelope back into a plain
/// string, for handing props/output to a provider. Never writes this form
/// back to a `StateStore`.
pub fn decode(value: &Value, key: Option<&DerivedKey>) -> Result<Value, SerdeError> {
    match value {
        Value::Object(map) => {
            if tag_of(map) == Some(SECRET_TAG) {
                let envelope: SecretEnvelope = serde_json::from_value(value.clone())
                    .map_err(|e| SerdeError::Malformed(e.to_string()))?;
                let key = key.ok_or(alchemy_secret::SecretError::KeyMissing)?;
                let plaintext = decrypt(&envelope, key)?;
                return Ok(Value::String(plaintext));
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), decode(v, key)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| decode(v, key))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// Thin newtype so `SecretEnvelope` (which already carries its own `@type`)
/// serializes identically whether it came from `alchemy-secret` directly or
/// through this codec.
struct TaggedEnvelope(SecretEnvelope);

impl From<SecretEnvelope> for TaggedEnvelope {
    fn from(e: SecretEnvelope) -> Self {
        TaggedEnvelope(e)
    }
}

impl serde::Serialize for TaggedEnvelope {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alchemy_secret::{load_or_create_salt, DerivedKey};

    fn test_key() -> DerivedKey {
        DerivedKey::derive("pw", b"salt-bytes-16---")
    }

    #[test]
    fn encode_then_decode_round_trips_plaintext() {
        let key = test_key();
        let props = serde_json::json!({
            "username": "alice",
            "password": secret_plain_value("swordfish"),
        });
        let encoded = encode(&props, Some(&key)).unwrap();
        assert_eq!(encoded["password"]["@type"], "secret");
        assert_ne!(encoded["password"]["ciphertext"], "swordfish");

        let decoded = decode(&encoded, Some(&key)).unwrap();
        assert_eq!(decoded["password"], "swordfish");
        assert_eq!(decoded["username"], "alice");
    }

    #[test]
    fn to_plain_unwraps_secret_plain_without_a_key() {
        let props = serde_json::json!({"password": secret_plain_value("swordfish")});
        let plain = to_plain(&props);
        assert_eq!(plain["password"], "swordfish");
    }

    #[test]
    fn encode_without_key_fails_when_secret_present() {
        let props = secret_plain_value("swordfish");
        let err = encode(&props, None).unwrap_err();
        assert!(matches!(err, SerdeError::Secret(_)));
    }

    #[test]
    fn encode_rejects_pending_reference() {
        let fqn = alchemy_domain::Fqn::new("app", "db").unwrap();
        let props = crate::reference::ResourceRef::pending_tagged_value(&fqn);
        let err = encode(&props, None).unwrap_err();
        assert!(matches!(err, SerdeError::UnresolvedReference { .. }));
    }

    #[test]
    fn primitives_pass_through_unchanged() {
        let v = serde_json::json!({"a": 1, "b": [true, null, "x"]});
        assert_eq!(encode(&v, None).unwrap(), v);
        assert_eq!(decode(&v, None).unwrap(), v);
    }

    #[test]
    fn load_or_create_salt_is_usable_as_derivation_input() {
        let dir = tempfile::tempdir().unwrap();
        let salt = load_or_create_salt(dir.path()).unwrap();
        let key = DerivedKey::derive("pw", &salt);
        let env = encode(&secret_plain_value("hi"), Some(&key)).unwrap();
        assert_eq!(decode(&env, Some(&key)).unwrap(), "hi");
    }
}
