//! CLI command implementations.
//!
//! | Module          | Commands handled                 |
//! |-----------------|----------------------------------|
//! | `run`           | `Run`                            |
//! | `tools`         | `Vendors`, `Diff`                |

pub mod run;
pub mod tools;

pub use run::cmd_run;
pub use tools::{cmd_diff, cmd_vendors};
