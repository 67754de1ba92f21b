//! Core identity types for fnbox.
//!
//! - `FunctionId` and `InvocationId` are TypeIDs (time-sortable, prefixed)
//! - `RuntimeId` is an operator-chosen, validated name such as `node20`

mod function_id;
mod invocation_id;
mod runtime_id;

pub use function_id::{FunctionId, InvalidFunctionId};
pub use invocation_id::{InvalidInvocationId, InvocationId};
pub use runtime_id::{InvalidRuntimeId, RuntimeId};
