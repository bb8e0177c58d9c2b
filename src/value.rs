//! JSON context helpers used by the chain executor.

use serde_json::{Map, Value};

/// Merge `overlay` into `base`, recursing through objects.
///
/// Non-object values from the overlay replace the base value outright,
/// arrays included. `Null` in the overlay clears the key.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Return a mutable reference to the object stored at `key`, creating
/// it when missing and replacing any non-object value already there.
pub fn ensure_object<'a>(base: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let map = match base {
        Value::Object(map) => map,
        _ => unreachable!("coerced to an object above"),
    };
    let slot = map
        .entry(key.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("coerced to an object above"),
    }
}
