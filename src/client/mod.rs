//! echolog client library

pub mod echo;

pub use echo::EchoClient;
