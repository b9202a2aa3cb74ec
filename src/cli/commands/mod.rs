mod destroy;
pub mod naming;
mod run;

pub use destroy::execute_destroy;
pub use run::execute_run;
