pub mod builtin;
pub mod registry;

pub use builtin::browser::WebDriverBackend;
pub use registry::ToolRegistry;
