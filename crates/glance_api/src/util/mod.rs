pub mod apply;
pub mod config;
pub mod errors;
pub mod glanceapi_status;
pub mod hash;
pub mod metrics;
pub mod status;
pub mod telemetry;
