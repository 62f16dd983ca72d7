use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const REGION: &str = "AWS::Region";
pub const ACCOUNT_ID: &str = "AWS::AccountId";
pub const STACK_NAME: &str = "AWS::StackName";
pub const STACK_ID: &str = "AWS::StackId";
pub const PARTITION: &str = "AWS::Partition";
pub const URL_SUFFIX: &str = "AWS::URLSuffix";
pub const NOTIFICATION_ARNS: &str = "AWS::NotificationARNs";
pub const NO_VALUE: &str = "AWS::NoValue";

const LOCAL_ACCOUNT_ID: &str = "123456789012";
const LOCAL_STACK_NAME: &str = "local";

/// Built-in template values with fixed local-emulation answers.
///
/// Injected into the resolver so templates loaded side by side never share
/// mutable lookup state.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoParameters {
    values: BTreeMap<String, Value>,
}

impl PseudoParameters {
    pub fn local(region: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(REGION.to_string(), json!(region));
        values.insert(ACCOUNT_ID.to_string(), json!(LOCAL_ACCOUNT_ID));
        values.insert(STACK_NAME.to_string(), json!(LOCAL_STACK_NAME));
        values.insert(
            STACK_ID.to_string(),
            json!(format!(
                "arn:aws:cloudformation:{region}:{LOCAL_ACCOUNT_ID}:stack/{LOCAL_STACK_NAME}/51af3dc0-da77-11e4-872e-1234567db123"
            )),
        );
        values.insert(PARTITION.to_string(), json!("aws"));
        values.insert(URL_SUFFIX.to_string(), json!("amazonaws.com"));
        values.insert(
            NOTIFICATION_ARNS.to_string(),
            json!([format!("arn:aws:sns:{region}:{LOCAL_ACCOUNT_ID}:notification")]),
        );
        values.insert(NO_VALUE.to_string(), Value::Null);
        Self { values }
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn text(&self, name: &str) -> &str {
        self.values.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn region(&self) -> &str {
        self.text(REGION)
    }

    pub fn account_id(&self) -> &str {
        self.text(ACCOUNT_ID)
    }

    pub fn partition(&self) -> &str {
        self.text(PARTITION)
    }
}

impl Default for PseudoParameters {
    fn default() -> Self {
        Self::local("us-east-1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_flows_into_derived_values() {
        let pseudo = PseudoParameters::local("eu-west-1");
        assert_eq!(pseudo.region(), "eu-west-1");
        assert!(pseudo
            .get(STACK_ID)
            .and_then(Value::as_str)
            .unwrap()
            .starts_with("arn:aws:cloudformation:eu-west-1:"));
        assert_eq!(pseudo.get(NO_VALUE), Some(&Value::Null));
    }
}
