pub mod connection;
pub mod executor;
pub mod introspection;
pub mod memory;
mod value;

pub use connection::{connect, connect_options, DbPool};
pub use executor::{PgStatementRunner, RowCollector, StatementRunner};
pub use introspection::{PgSchemaSource, SchemaError, SchemaIntrospector, SchemaSource};
pub use memory::{InMemorySchemaSource, InMemoryStatementRunner};
