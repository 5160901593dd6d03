use std::collections::BTreeMap;

pub const STACK_LABEL: &str = "stack";
pub const STACK_LABEL_VALUE: &str = "true";

pub fn get_stack_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(STACK_LABEL.to_owned(), STACK_LABEL_VALUE.to_owned())])
}

pub fn get_stack_selector() -> String {
    format!("{STACK_LABEL}={STACK_LABEL_VALUE}")
}

pub fn get_component_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_owned(), component.to_owned()),
        ("app.kubernetes.io/managed-by".to_owned(), "stack-operator".to_owned()),
    ])
}

pub fn has_stack_label(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels
        .and_then(|labels| labels.get(STACK_LABEL))
        .is_some_and(|value| value == STACK_LABEL_VALUE)
}
