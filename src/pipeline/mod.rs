pub mod delivery;
pub mod gate;
pub mod latest;

pub use delivery::{
    Admission, DeliveryMode, FrameDeliveryPipeline, FrameSink, PipelineStats, SinkStatus,
};
pub use gate::{InFlight, SingleFlightGate};
pub use latest::{LatestFrameChannel, SendOutcome};
