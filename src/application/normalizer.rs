//! Contact normalization.
//!
//! Raw contact fields come from the schema reader in whatever shape the
//! source stored them. All shape handling lives here: every field goes
//! through an explicit coercion and nothing in this module can fail.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::domain::{Contact, GroupFlag, RawContact};

/// Characters that may not appear in a display label.
const UNSAFE_LABEL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '\r', '\n'];

/// Normalizes a raw row into a canonical contact.
///
/// Returns `None` only when the row has no usable id; every other defect
/// degrades the affected field to its default.
#[must_use]
pub fn normalize_contact(raw: &RawContact) -> Option<Contact> {
    let id = coerce_text(&raw.id).trim().to_string();
    if id.is_empty() {
        return None;
    }

    let remark = coerce_text(&raw.remark);
    let nickname = coerce_text(&raw.nickname);
    let alias = coerce_text(&raw.alias);

    let display_label = resolve_label(&remark, &nickname, &id);
    let is_group = classify_group(&raw.group);

    Some(Contact {
        id,
        display_label,
        is_group,
        alias,
    })
}

/// Remark beats nickname beats id; the winner is made path-safe.
fn resolve_label(remark: &str, nickname: &str, id: &str) -> String {
    let chosen = [remark, nickname]
        .into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(id);

    sanitize_label(chosen)
}

/// Replaces filesystem-unsafe and control characters with `_`.
///
/// A label made only of dots would name the current or parent directory,
/// so its dots are replaced as well.
#[must_use]
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if UNSAFE_LABEL_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    if !cleaned.is_empty() && cleaned.chars().all(|c| c == '.') {
        return "_".repeat(cleaned.chars().count());
    }
    cleaned
}

/// Coerces any stored value to text.
///
/// Arrays join their non-empty parts with a single space. Falsy scalars
/// (null, `false`, `0`, empty containers) become the empty string.
#[must_use]
pub fn coerce_text(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(coerce_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Number(n) if n.as_f64() == Some(0.0) => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

fn classify_group(flag: &GroupFlag) -> bool {
    match flag {
        GroupFlag::Accessor(accessor) => {
            match panic::catch_unwind(AssertUnwindSafe(|| accessor())) {
                Ok(Ok(is_group)) => is_group,
                Ok(Err(e)) => {
                    tracing::debug!("Group classification failed: {}", e);
                    false
                }
                Err(_) => {
                    tracing::warn!("Group classification panicked");
                    false
                }
            }
        }
        GroupFlag::Field(value) => coerce_bool(value),
        GroupFlag::Absent => false,
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn raw(id: Value, remark: Value, nickname: Value) -> RawContact {
        RawContact {
            id,
            remark,
            nickname,
            alias: Value::Null,
            group: GroupFlag::Absent,
        }
    }

    #[test]
    fn test_label_precedence_all_combinations() {
        for remark_present in [false, true] {
            for nickname_present in [false, true] {
                let remark = if remark_present { json!("R") } else { Value::Null };
                let nickname = if nickname_present { json!("N") } else { json!("") };
                let contact = normalize_contact(&raw(json!("wxid_x"), remark, nickname)).unwrap();

                let expected = match (remark_present, nickname_present) {
                    (true, _) => "R",
                    (false, true) => "N",
                    (false, false) => "wxid_x",
                };
                assert_eq!(contact.display_label, expected);
                assert_eq!(contact.id, "wxid_x");
            }
        }
    }

    #[test]
    fn test_label_never_contains_unsafe_chars() {
        let hostile = [
            json!("a\\b/c:d*e?f\"g<h>i|j\r\nk"),
            json!(["x/y", "", "z|w"]),
            json!(["", "", ""]),
            json!(12.5),
            json!("\u{7}bell"),
        ];
        for value in hostile {
            let contact =
                normalize_contact(&raw(json!("id/with:colon"), value.clone(), value)).unwrap();
            assert!(
                !contact.display_label.contains(UNSAFE_LABEL_CHARS),
                "unsafe label: {:?}",
                contact.display_label
            );
        }
    }

    #[test]
    fn test_dot_only_labels_are_replaced() {
        for (remark, expected) in [(".", "_"), ("..", "__"), (" ... ", "___")] {
            let contact = normalize_contact(&raw(json!("wxid_dots"), json!(remark), Value::Null)).unwrap();
            assert_eq!(contact.display_label, expected);
        }
        assert_eq!(sanitize_label("a.b"), "a.b");
        assert_eq!(sanitize_label("..."), "___");
        assert_eq!(sanitize_label("../x"), ".._x");
    }

    #[test]
    fn test_composite_parts_are_joined() {
        assert_eq!(coerce_text(&json!(["Bob", "", "Smith"])), "Bob Smith");
        assert_eq!(coerce_text(&json!([["a"], "b"])), "a b");
    }

    #[test]
    fn test_non_string_scalars() {
        assert_eq!(coerce_text(&json!(42)), "42");
        assert_eq!(coerce_text(&json!(0)), "");
        assert_eq!(coerce_text(&json!(false)), "");
        assert_eq!(coerce_text(&json!(true)), "true");
        assert_eq!(coerce_text(&Value::Null), "");
    }

    #[test]
    fn test_missing_id_is_rejected() {
        assert!(normalize_contact(&raw(Value::Null, json!("R"), json!("N"))).is_none());
        assert!(normalize_contact(&raw(json!("  "), json!("R"), json!("N"))).is_none());
    }

    #[test]
    fn test_group_accessor_and_field() {
        let mut contact = raw(json!("123@chatroom"), Value::Null, Value::Null);
        contact.group = GroupFlag::Accessor(Arc::new(|| Ok(true)));
        assert!(normalize_contact(&contact).unwrap().is_group);

        contact.group = GroupFlag::Accessor(Arc::new(|| Err("broken".into())));
        assert!(!normalize_contact(&contact).unwrap().is_group);

        contact.group = GroupFlag::Field(json!(1));
        assert!(normalize_contact(&contact).unwrap().is_group);

        contact.group = GroupFlag::Field(json!("nope"));
        assert!(!normalize_contact(&contact).unwrap().is_group);
    }

    #[test]
    fn test_panicking_accessor_defaults_to_false() {
        let mut contact = raw(json!("wxid_p"), json!("P"), Value::Null);
        contact.group = GroupFlag::Accessor(Arc::new(|| panic!("accessor exploded")));
        let normalized = normalize_contact(&contact).unwrap();
        assert!(!normalized.is_group);
        assert_eq!(normalized.display_label, "P");
    }
}
