use super::crd::v1beta1::stack::Stack;

pub trait TryStackMeta {
    fn try_get_namespace_name(&self) -> Option<String>;
    fn try_get_sub_object_name(&self, component: &str) -> Option<String>;
}

impl TryStackMeta for Stack {
    fn try_get_namespace_name(&self) -> Option<String> {
        self.metadata.name.to_owned()
    }

    fn try_get_sub_object_name(&self, component: &str) -> Option<String> {
        self.metadata
            .name
            .as_ref()
            .map(|name| format!("{name}-{component}"))
    }
}
