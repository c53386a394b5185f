use thiserror::Error;

/// Unified pipeline error type.
///
/// Every stage catches these at its dequeue-loop boundary: the offending item
/// is logged together with the error and dropped, and the worker returns to
/// the queue. Nothing in this enum is fatal to a worker.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// MAC address has no product name in the device registry.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Product name did not resolve to any model folder on disk.
    #[error("unknown model for device '{0}'")]
    UnknownModel(String),

    /// Device model has no periodic fingerprint file.
    #[error("missing fingerprint for model '{0}'")]
    MissingFingerprint(String),

    /// A fingerprint tuple matched but its filter model artifact is absent.
    #[error("missing filter model: {0}")]
    MissingFilterModel(String),

    /// Packet failed validation before flow keying.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Standardizer transform produced no usable output.
    #[error("transform failure: {0}")]
    TransformFailure(String),

    /// Classifier prediction failed.
    #[error("predict failure: {0}")]
    PredictFailure(String),

    /// Artifact or CSV I/O failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded queue was full and the oldest entry was dropped.
    #[error("queue backpressure on {0}")]
    Backpressure(&'static str),
}

impl PipelineError {
    /// Expected, routinely occurring conditions that warrant an informational
    /// log rather than a warning.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownDevice(_)
                | PipelineError::UnknownModel(_)
                | PipelineError::MissingFingerprint(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors() {
        assert!(PipelineError::UnknownDevice("aa:bb".into()).is_expected());
        assert!(PipelineError::UnknownModel("plug".into()).is_expected());
        assert!(PipelineError::MissingFingerprint("plug".into()).is_expected());
        assert!(!PipelineError::PredictFailure("boom".into()).is_expected());
        assert!(!PipelineError::Backpressure("burst_queue").is_expected());
    }

    #[test]
    fn test_error_display() {
        let e = PipelineError::UnknownDevice("aa:bb:cc:dd:ee:ff".into());
        assert_eq!(e.to_string(), "unknown device: aa:bb:cc:dd:ee:ff");

        let e = PipelineError::MissingFilterModel("plughostTCP.model".into());
        assert!(e.to_string().contains("plughostTCP.model"));
    }
}
