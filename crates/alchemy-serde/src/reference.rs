use alchemy_domain::Fqn;
use serde_json::{json, Value};

use crate::error::SerdeError;

pub const RESOURCE_REF_TAG: &str = "resource-ref";
pub const RESOURCE_REF_PENDING_TAG: &str = "resource-ref-pending";

/// A tagged pointer to another resource's handle, as embedded in a value
/// tree passed to `encode`/`decode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub fqn: Fqn,
}

impl ResourceRef {
    pub fn to_tagged_value(&self) -> Value {
        json!({ "@type": RESOURCE_REF_TAG, "fqn": self.fqn.as_str() })
    }

    /// The placeholder embedded in props while a dependency's handle is
    /// still unresolved. `encode` rejects a value tree containing this tag.
    pub fn pending_tagged_value(fqn: &Fqn) -> Value {
        json!({ "@type": RESOURCE_REF_PENDING_TAG, "fqn": fqn.as_str() })
    }

    pub fn from_tagged_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("@type")?.as_str()? != RESOURCE_REF_TAG {
            return None;
        }
        let fqn = obj.get("fqn")?.as_str()?.to_string();
        Some(ResourceRef { fqn: Fqn(fqn) })
    }
}

/// Returns every `Fqn` referenced by a tagged `resource-ref` anywhere in
/// `value`, used by the runner to record a resource's `deps`.
pub fn collect_refs(value: &Value, out: &mut Vec<Fqn>) {
    match value {
        Value::Object(map) => {
            if let Some(r) = ResourceRef::from_tagged_value(value) {
                out.push(r.fqn);
                return;
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_refs(v, out);
            }
        }
        _ => {}
    }
}

/// Fails if any node in `value` is still a pending (unresolved) reference.
pub fn check_no_pending_refs(value: &Value) -> Result<(), SerdeError> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(tag)) = map.get("@type") {
                if tag == RESOURCE_REF_PENDING_TAG {
                    let fqn = map
                        .get("fqn")
                        .and_then(|v| v.as_str())
                        .unwrap_or("<unknown>")
                        .to_string();
                    return Err(SerdeError::UnresolvedReference { fqn });
                }
            }
            for v in map.values() {
                check_no_pending_refs(v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                check_no_pending_refs(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
