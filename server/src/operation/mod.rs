//! Translation of client requests into document-store operations.
//!
//! A request flows through [`request::normalize`], the sort resolver in
//! [`sort`], [`builder::execute`] and finally [`encoder::encode`].

pub mod builder;
pub mod encoder;
pub mod request;
pub mod sort;

pub use builder::{OperationResult, execute};
pub use encoder::{ResponseFormat, encode};
pub use request::{Namespace, NamespaceDefaults, Operation, OperationKind, OperationRequest, normalize};
