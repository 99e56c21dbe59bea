//! examsession-report: Rendering of finalized exam results.

pub mod html;

pub use html::{generate_html, write_html_report};
