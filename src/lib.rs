pub mod compartments;
pub mod time;
pub mod feed;
pub mod mqtt;
pub mod recipients;
pub mod push;
pub mod notifier;
pub mod http;
pub mod config;
pub mod log_level;

#[cfg(test)]
mod test_support;
