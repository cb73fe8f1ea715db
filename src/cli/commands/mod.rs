//! CLI command implementations

pub mod config;
pub mod list;
pub mod report;
pub mod reset;
pub mod select;
pub mod status;
pub mod sweep;

pub use config::execute as config;
pub use list::execute as list;
pub use report::execute as report;
pub use reset::execute as reset;
pub use select::execute as select;
pub use status::execute as status;
pub use sweep::execute as sweep;
