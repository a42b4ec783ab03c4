pub mod glanceapi;
pub mod glanceapi_controller;
