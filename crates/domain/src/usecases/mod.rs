//! Application use cases / business logic

pub mod dispatch;
pub mod render;

pub use dispatch::{ConfiguredSource, Dispatcher, DispatcherConfig};
pub use render::{RenderConfig, Renderer};
