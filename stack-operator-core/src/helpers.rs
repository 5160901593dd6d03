use std::any::type_name;

use kube::Resource;

pub fn pretty_type_name<'a, T>() -> &'a str {
    let full_name = type_name::<T>();

    full_name.rsplit("::").next().unwrap_or(full_name)
}

pub trait AndIf<F> {
    fn and_if(self, condition: bool, then: F) -> Self;
}

impl<T, F> AndIf<F> for T
where
    F: FnOnce(Self) -> Self,
{
    fn and_if(self, condition: bool, then: F) -> Self {
        let mut obj = self;
        if condition {
            obj = then(obj);
        }

        obj
    }
}

pub trait RequireMetadata<E> {
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E>;
}

impl<T: Resource, E> RequireMetadata<E> for T {
    fn require_name_or_else(&self, error: impl FnOnce() -> E) -> Result<&str, E> {
        Ok(self
            .meta()
            .name
            .as_ref()
            .ok_or_else(error)?
            .as_str())
    }
}
