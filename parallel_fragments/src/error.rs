use thiserror::Error;

/// Failure reported by a block codec.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("output does not fit in {capacity} bytes")]
    OutputOverflow { capacity: usize },
    #[error("malformed compressed payload: {0}")]
    Malformed(String),
    #[error("codec failure: {0}")]
    Codec(String),
}

/// Every way a pipeline run can fail. All of them are fatal to the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("corrupt frame at block {block}: {reason}")]
    CorruptFrame { block: u64, reason: String },

    #[error("insufficient disk space: {required} bytes required, {available} bytes available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("transform failed on block {block}: {source}")]
    Transform {
        block: u64,
        #[source]
        source: TransformError,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),

    /// A stage stopped because another stage failed first.
    #[error("pipeline aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
