//! Core domain types shared by the Canopy crates.
//!
//! This crate defines the value types exchanged with the metadata store:
//! - Drive nodes (directories, files, images, videos) and their kinds
//! - Change actions produced by a remote change-log
//! - Absolute drive paths
//! - Metadata store configuration

pub mod config;
pub mod error;
pub mod node;
pub mod path;

pub use error::{Error, Result};
pub use node::{ChangeAction, FileInfo, Node, NodeKind, PrivateMap};
pub use path::DrivePath;
