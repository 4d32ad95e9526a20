//! CLI command handlers, one per file.

pub(crate) mod add;
mod delete;
pub(crate) mod offline;
mod pause;
mod resume;
mod run;
pub(crate) mod status;

pub use add::run_add;
pub use delete::run_delete;
pub use pause::run_pause;
pub use resume::run_resume;
pub use run::run_manager;
pub use status::run_status;
