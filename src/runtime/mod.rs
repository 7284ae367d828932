//! Runtime support
//!
//! This module contains the object model used during execution:
//! - Flat property hashes (own and shared tables)
//! - Objects, property slots and descriptors
//! - Function templates and function objects
//! - Property lookup and mutation along prototype chains
//! - Call mechanics
//! - Host-defined objects

pub mod call;
pub mod external;
pub mod flathsh;
pub mod function;
pub mod object;
pub mod property;
pub mod query;

pub use flathsh::FlatHash;
pub use function::{FunctionData, FunctionKind, Lambda, NativeFunction};
pub use object::{ArrayElements, Object, ObjectKind, SharedTable, TypedArrayKind};
pub use property::{PropertyDescriptor, PropertyKind, PropertySlot};
pub use query::{Holder, PropertyQuery, QueryMode};
