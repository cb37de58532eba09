//! Tool contracts for answer generation.
//!
//! Tools are executed by the answer generator. Side-effecting tools are only
//! executed after the registered [`ToolInterceptor`] lets them proceed.

mod error;
mod http_action;
mod intercept;
mod traits;

pub use error::{Result, ToolError};
pub use http_action::{HttpActionConfig, HttpActionTool, HttpMethod};
pub use intercept::{InterceptDecision, ToolInterceptor, ToolInvocation};
pub use traits::{Tool, ToolEffect, ToolSpec, to_llm_tool_def};
