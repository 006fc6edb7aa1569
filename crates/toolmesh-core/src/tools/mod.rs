//! Tool management
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ToolRegistry (rebuilt per turn)             │
//! │                                              │
//! │  Local tools:   getWeather, calculate, ...   │
//! │  Remote tools:  <provider>_<tool>            │
//! └──────────────────────────────────────────────┘
//!           │
//!           │ call_tool(provider, tool, args)
//!           ▼
//! ┌──────────────────────────────────────────────┐
//! │  ConnectionManager (process-wide)            │
//! │    git ──stdio──▶ uvx mcp-server-git         │
//! │    filesystem ──stdio──▶ npx server-fs       │
//! └──────────────────────────────────────────────┘
//! ```

mod calculator;
mod local;
mod registry;

pub use calculator::{evaluate, format_number, CalcError};
pub use local::{builtin_tools, Calculate, GetCurrentTime, GetWeather, LocalTool, SearchInfo};
pub use registry::{MergedTool, ToolOutcome, ToolRegistry, ToolSource};
