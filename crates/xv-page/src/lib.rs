//! Host page integration: binds `load` elements to the loader pipeline and
//! keeps the table of contents and timestamp holders up to date.

pub mod config;
pub mod init;
pub mod timestamp;
pub mod toc;
pub mod viewer;

pub use config::ViewerConfig;
pub use init::InitReport;
pub use init::PageInitializer;
pub use timestamp::TimestampFormatter;
pub use toc::TocBuilder;
pub use viewer::PageSource;
pub use viewer::Viewer;
