/// Stream wrappers applied to the inbound half of a connection.
pub mod timeout;
