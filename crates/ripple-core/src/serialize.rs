//! Element state serialization.
//!
//! Serializes one element at a time, non-recursively: references to child
//! elements become integer ids. High-level elements only ship metadata, the
//! computed layout tuples, and a `_child_` pointer at their build result;
//! their user-defined state never reaches the client.

use ahash::AHashSet;
use ripple_foundation::ElementId;
use serde_json::{json, Value as Json};

use crate::element::ElementStore;
use crate::registry::is_layout_field;
use crate::session::Session;
use crate::value::Value;

/// Convert a resolved property value to its wire form.
fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Element(id) => json!(id.get()),
        Value::Json(payload) => payload.clone(),
        // Slots are resolved before serialization; these never appear.
        Value::Binding(_) | Value::Pending(_) => Json::Null,
    }
}

/// Effective margin of one side: per-side beats axis beats all, missing
/// resolves to 0.
fn resolve_margin(side: &Value, axis: &Value, all: &Value) -> f64 {
    for candidate in [side, axis, all] {
        if let Some(value) = candidate.as_float() {
            return value;
        }
    }
    0.0
}

/// Serialize one element's state, restricted to `fields` (plus the keys
/// that are always present).
pub(crate) fn serialize_element(
    session: &Session,
    elements: &ElementStore,
    id: ElementId,
    fields: &AHashSet<usize>,
) -> serde_json::Map<String, Json> {
    let Some(element) = elements.get(id) else {
        return serde_json::Map::new();
    };
    let ty = element.element_type();

    let mut result = serde_json::Map::new();
    result.insert("_python_type_".into(), json!(ty.name));
    result.insert(
        "_key_".into(),
        element
            .key()
            .map_or(Json::Null, |key| json!(key.to_string())),
    );
    result.insert("_rio_internal_".into(), json!(ty.builtin));

    // Layout travels as four computed tuples instead of a dozen fields.
    let layout = |name: &str| session.resolve_slot(id, ty.field(name).expect("layout field"));
    let margin = layout("margin");
    let margin_x = layout("margin_x");
    let margin_y = layout("margin_y");
    result.insert(
        "_margin_".into(),
        json!([
            resolve_margin(&layout("margin_left"), &margin_x, &margin),
            resolve_margin(&layout("margin_top"), &margin_y, &margin),
            resolve_margin(&layout("margin_right"), &margin_x, &margin),
            resolve_margin(&layout("margin_bottom"), &margin_y, &margin),
        ]),
    );

    let width = layout("width");
    let height = layout("height");
    result.insert(
        "_size_".into(),
        json!([width.size_component(), height.size_component()]),
    );
    result.insert(
        "_align_".into(),
        json!([
            layout("align_x").as_float(),
            layout("align_y").as_float(),
        ]),
    );
    result.insert(
        "_grow_".into(),
        json!([width.is_grow(), height.is_grow()]),
    );

    if let Some(fundamental) = ty.fundamental() {
        // The client renders fundamental elements itself and needs their
        // state. Only the requested (i.e. changed) fields are shipped.
        let mut indices: Vec<usize> = fields
            .iter()
            .copied()
            .filter(|&idx| !is_layout_field(idx) && ty.fields[idx].serialize)
            .collect();
        indices.sort_unstable();
        for idx in indices {
            let value = session.resolve_slot(id, idx);
            result.insert(ty.fields[idx].name.clone(), value_to_json(&value));
        }
        result.insert("_type_".into(), json!(fundamental.type_name));
    } else {
        // High-level elements are placeholders pointing at their output.
        result.insert("_type_".into(), json!("Placeholder"));
        if let Some(data) = &element.build_data {
            result.insert("_child_".into(), json!(data.build_result.get()));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_resolution_per_side_beats_axis_beats_all() {
        // margin=1, margin_x=2, margin_left=3 resolves to (3, 1, 2, 1).
        let all = Value::Int(1);
        let x = Value::Int(2);
        let left = Value::Int(3);
        let unset = Value::Null;

        assert_eq!(resolve_margin(&left, &x, &all), 3.0);
        assert_eq!(resolve_margin(&unset, &unset, &all), 1.0);
        assert_eq!(resolve_margin(&unset, &x, &all), 2.0);
        assert_eq!(resolve_margin(&unset, &unset, &unset), 0.0);
    }

    #[test]
    fn child_references_serialize_as_integers() {
        let value = Value::List(vec![
            Value::Element(ElementId::new(4)),
            Value::Element(ElementId::new(9)),
        ]);
        assert_eq!(value_to_json(&value), json!([4, 9]));
    }
}
