pub mod extractor;
pub mod notion;
pub mod slack;
pub mod watermark;
