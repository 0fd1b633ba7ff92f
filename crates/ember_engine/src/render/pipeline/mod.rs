//! Graphics pipeline configuration and management

pub mod pipeline_config;
pub mod pipeline_manager;

pub use pipeline_config::{CullMode, PipelineConfig};
pub use pipeline_manager::{PipelineId, PipelineLayout, PipelineManager};
