pub mod execution;
pub mod message;
pub mod schema;
pub mod statement;
