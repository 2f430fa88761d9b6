use thiserror::Error;

/// Lightweight error enum - only 1 byte!
/// The descriptive message is stored in `LuaVM::error_message`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Requested object size is beyond the representable maximum
    #[error("Size Exceeded")]
    SizeExceeded,
    /// Memory limit reached or the allocation hook declined
    #[error("Out Of Memory")]
    OutOfMemory,
    /// Precompiled chunk failed to load - message stored in vm.error_message
    #[error("Malformed Chunk")]
    MalformedChunk,
    /// Stack or call-info chain grew beyond the configured maximum
    #[error("Stack Overflow")]
    StackOverflow,
    /// Runtime error - message stored in vm.error_message
    #[error("Runtime Error")]
    RuntimeError,
}

pub type LuaResult<T> = Result<T, LuaError>;
