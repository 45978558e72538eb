//! Repository traits for tree store operations.

pub mod changes;
pub mod diagnostics;
pub mod nodes;

pub use changes::ChangeRepo;
pub use diagnostics::DiagnosticsRepo;
pub use nodes::NodeRepo;
