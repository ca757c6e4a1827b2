//! Upload finalize service and processing hand-off

mod finalize;
mod pipeline;

pub use finalize::{
    FinalizeError, FinalizeRequest, FinalizeResponse, FinalizedAsset, UploadFinalizer,
    ValidationError,
};
pub use pipeline::{NoopPipeline, ProcessingPipeline};
