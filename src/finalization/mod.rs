//! Background finalization: cancellable tasks and the stage pipeline.

pub mod pipeline;
pub mod task;

pub use pipeline::{
    FinalizationEvent, FinalizationHandle, FinalizationPipeline, FinalizationRequest, FinalizationSink, MeshSource,
    RunId,
};
pub use task::{CancelToken, Stage, StageSender, TwoStageTask};
