pub mod db;
pub mod memory;
pub mod models;
pub mod schema;
pub mod tags;
pub mod tasks;

mod error;

pub use error::Error;
pub use memory::MemoryTaskStore;
pub use models::{ExportStatus, ExportTask, TagRow};
pub use tasks::{PgTaskStore, TaskStore};

use std::{future::Future, pin::Pin};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
