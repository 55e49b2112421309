pub mod http;
pub mod registry;
pub mod session;

#[cfg(test)]
pub mod fake;
