//! Agent sessions: the runtime contract, a genai-backed runtime, and prompt
//! construction.

pub mod genai_runtime;
pub mod runtime;
pub mod system_prompt;
