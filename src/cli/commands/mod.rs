//! Command implementations, one module per subcommand.

pub mod check;
pub mod run;
pub mod scan;
pub mod worker;
