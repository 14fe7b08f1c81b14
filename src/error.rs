#[derive(Debug)]
pub enum Error {
    /// buffer pool exhausted: no frame became evictable before the
    /// pool-overflow timeout elapsed.
    PoolOverflow,
    /// a closure was submitted to the task scheduler after `stop()`.
    InvalidPool,
    /// read/write of page id 0, or an out-of-range page offset.
    SegmentationFault,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PoolOverflow => write!(f, "buffer pool overflow: no evictable frame"),
            Error::InvalidPool => write!(f, "scheduler rejected submission after stop()"),
            Error::SegmentationFault => write!(f, "segmentation fault: page id 0 or out of range"),
        }
    }
}

impl std::error::Error for Error {}
