pub mod api;
pub mod controllers;
pub mod util;

#[cfg(test)]
pub mod fixtures;
