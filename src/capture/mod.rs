pub mod decoder;
pub mod frame;
pub mod selector;

pub use decoder::{FrameConverter, RgbConverter};
pub use frame::{FrameMetadata, PixelFormat, ProcessedFrame, RawFrame};
pub use selector::SelectionStrategy;
