use serde_json::{json, Map, Value};

pub const REF: &str = "Ref";
pub const GET_ATT: &str = "Fn::GetAtt";
pub const JOIN: &str = "Fn::Join";
pub const SUB: &str = "Fn::Sub";
const CONDITION: &str = "Condition";
const FUNCTION_PREFIX: &str = "Fn::";

/// One intrinsic function call found in a property value.
///
/// Operands are borrowed from a value whose children are already resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntrinsicCall<'a> {
    Reference(&'a Value),
    AttributeOf(&'a Value),
    Join(&'a Value),
    Substitute(&'a Value),
    Unsupported(&'a str),
}

impl<'a> IntrinsicCall<'a> {
    /// Recognizes the explicit `{"Fn::Name": operand}` form.
    pub fn detect(map: &'a Map<String, Value>) -> Option<Self> {
        if map.len() != 1 {
            return None;
        }
        let (name, operand) = map.iter().next()?;
        match name.as_str() {
            REF => Some(IntrinsicCall::Reference(operand)),
            GET_ATT => Some(IntrinsicCall::AttributeOf(operand)),
            JOIN => Some(IntrinsicCall::Join(operand)),
            SUB => Some(IntrinsicCall::Substitute(operand)),
            other if other.starts_with(FUNCTION_PREFIX) => Some(IntrinsicCall::Unsupported(other)),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            IntrinsicCall::Reference(_) => REF,
            IntrinsicCall::AttributeOf(_) => GET_ATT,
            IntrinsicCall::Join(_) => JOIN,
            IntrinsicCall::Substitute(_) => SUB,
            IntrinsicCall::Unsupported(name) => name,
        }
    }
}

/// Rewrites a short-form tag (`!Ref`, `!GetAtt`, `!Sub`, ...) into the
/// explicit single-key mapping every later stage works on.
pub fn explicit_form(tag: &str, operand: Value) -> Value {
    let tag = tag.trim_start_matches('!');
    match tag {
        REF | CONDITION => json!({ tag: operand }),
        "GetAtt" => {
            let operand = match operand {
                Value::String(dotted) => match dotted.split_once('.') {
                    Some((resource, attribute)) => json!([resource, attribute]),
                    None => Value::String(dotted),
                },
                other => other,
            };
            json!({ GET_ATT: operand })
        }
        _ => json!({ format!("{FUNCTION_PREFIX}{tag}"): operand }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tags_become_explicit_calls() {
        assert_eq!(explicit_form("!Ref", json!("Table")), json!({"Ref": "Table"}));
        assert_eq!(
            explicit_form("!GetAtt", json!("Fn.Arn")),
            json!({"Fn::GetAtt": ["Fn", "Arn"]})
        );
        assert_eq!(
            explicit_form("Sub", json!("x-${Stage}")),
            json!({"Fn::Sub": "x-${Stage}"})
        );
        assert_eq!(
            explicit_form("!Select", json!([0, ["a"]])),
            json!({"Fn::Select": [0, ["a"]]})
        );
    }

    #[test]
    fn detect_only_matches_single_key_maps() {
        let call = json!({"Fn::Join": ["-", ["a", "b"]]});
        let map = call.as_object().unwrap();
        assert!(matches!(IntrinsicCall::detect(map), Some(IntrinsicCall::Join(_))));

        let literal = json!({"Ref": "A", "Other": 1});
        assert_eq!(IntrinsicCall::detect(literal.as_object().unwrap()), None);

        let unsupported = json!({"Fn::If": ["Cond", "a", "b"]});
        let call = IntrinsicCall::detect(unsupported.as_object().unwrap()).unwrap();
        assert_eq!(call.name(), "Fn::If");
    }
}
