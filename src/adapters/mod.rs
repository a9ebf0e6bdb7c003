// Concrete stores behind the `PaymentStore` port.

pub mod memory;
pub mod mysql;

pub use memory::{MemoryConnector, MemoryStore};
pub use mysql::{MySqlConnector, MySqlStore};
