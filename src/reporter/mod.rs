//! Reporter module: report compilation, rendering and artifact output

pub mod artifacts;
pub mod compiler;
pub mod console;
pub mod format;
pub mod json;
pub mod markdown;

pub use artifacts::{publish, render_result_csv};
pub use compiler::ReportCompiler;
pub use console::ConsoleReporter;
pub use json::JsonReporter;
pub use markdown::MarkdownReporter;
