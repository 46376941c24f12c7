pub mod connection;
pub mod fanout;
pub mod registry;

pub use fanout::Fanout;
pub use registry::SubscriptionRegistry;
