use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

use self::stack::Stack;

pub mod stack;

pub fn v1beta1_crds() -> Vec<CustomResourceDefinition> {
    vec![Stack::crd()]
}
