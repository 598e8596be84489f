//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use archetype_store::prelude::*;
//! ```

pub use crate::command::Commands;
pub use crate::component::{Component, ComponentInfo};
pub use crate::config::WorldConfig;
pub use crate::debug::WorldInspector;
pub use crate::deferred::DeferredWriter;
pub use crate::entity::{EntityId, ANY_PAIR, WILDCARD};
pub use crate::error::{EcsError, Result};
pub use crate::term::QueryTerm;
pub use crate::world::{ComponentRef, World};
