pub mod builders;
pub mod manual_backend;

pub use builders::{envelope, exit_task, fixed};
pub use manual_backend::ManualBackend;
