pub mod keystone;
pub mod v1beta1;
