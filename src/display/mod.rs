pub mod buffer;
pub mod renderer;

pub use buffer::{DoubleBuffer, VisualizationCanvas, VisualizationFrame};
pub use renderer::VisualizationRenderer;
