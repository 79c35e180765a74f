#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Pod, Service,
    ServicePort, ServiceSpec,
};
pub use kube::{
    api::{Api, ObjectMeta},
    Client, ResourceExt,
};
