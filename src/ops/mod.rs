//! Reference primitives built on the completion framework.
//!
//! - [`lpc`](lpc()) / [`lpc_ff`]: run a closure on a persona of this process
//! - [`rpc`] / [`rpc_ff`]: run a closure on the world persona of a rank
//!
//! Both accept a [`Completions`](crate::completion::Completions) set and
//! report through it exactly as a put, get or collective would. Closures
//! travel as type-erased active messages; there is no serialization layer.

mod lpc;
mod rpc;

pub use self::lpc::{lpc, lpc_ff, lpc_with};
pub use self::rpc::{rpc, rpc_ff};
