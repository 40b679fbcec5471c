pub mod cache;
pub mod object_detection;
pub mod registry;
pub mod system;
pub mod trait_def;

pub use cache::ToolCache;
pub use object_detection::{count_labels, error_line, render_report, ObjectDetectionTool, TOOL_NAME};
pub use registry::ToolRegistry;
pub use system::ToolSystem;
pub use trait_def::{function_name, Tool};
