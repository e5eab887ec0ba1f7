pub mod discovery;
pub mod extractor;
pub mod output_sink;
pub mod page_logger;

pub use discovery::CollectionDiscovery;
pub use extractor::{JsPageExtractor, PageExtractor};
pub use output_sink::{FsOutputSink, OutputSink};
pub use page_logger::PageLogger;
