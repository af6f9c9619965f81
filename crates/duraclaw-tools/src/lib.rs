//! DuraClaw Tools — server-side and suspendable tool traits + registries

pub mod plugin;
pub mod registry;

pub use plugin::{
    ElicitRequest, ElicitResponse, PluginContext, PluginEvent, PluginTool, PluginToolRegistry, SampleRequest,
};
pub use registry::{Tool, ToolRegistry, ToolResult};
