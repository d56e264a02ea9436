pub mod outline_publisher;
pub mod remote_store;
