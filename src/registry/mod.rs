pub mod memory;
pub mod postgres;

pub use memory::InMemoryRegistry;
pub use postgres::PgRegistry;
