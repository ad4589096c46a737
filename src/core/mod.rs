pub mod attempt;
pub mod classify;
pub mod error;
pub mod filename;
pub mod http_client;
pub mod identity;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod rate_limit;
pub mod strategy;
pub mod timing;
pub mod url_parser;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod test_support;
