mod connection;
mod connector;

pub use connection::{collect_body, Http1Connection};
pub use connector::HttpConnector;
