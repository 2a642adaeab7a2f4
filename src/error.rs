// error.rs — Crate-wide error type.
//
// Every failure in the pipeline is fatal: a configuration mistake, a shader
// that does not compile, or a device fault that invalidates the dependency
// graph. There is no retry path, so the variants only carry enough context
// to diagnose the problem.

use thiserror::Error;

/// Errors produced while configuring or running the transform.
#[derive(Debug, Error)]
pub enum Error {
    /// Filter or buffer parameters violate an operator invariant
    /// (mismatched lengths, odd decimating length, insufficient padding
    /// for the block extent, ...). Raised before any device work is issued.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Kernel program compilation failed. `log` holds the compiler output.
    #[error("failed to build program `{program}`:\n{log}")]
    ProgramBuild { program: String, log: String },

    /// A launch or transfer failed on the device.
    #[error("execution error: {0}")]
    Execution(String),

    /// Caller-supplied buffers do not match what the operator expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A command touches a storage region without depending on the pending
    /// command that last wrote (or is still reading) it.
    #[error("unordered access to {region}: command depends on neither {conflict} nor its successors")]
    UnorderedAccess { region: String, conflict: String },

    /// No usable adapter, or the device request was refused.
    #[error("device error: {0}")]
    Device(String),

    #[error("failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    /// Configuration file could not be read.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Return `Error::Configuration` unless `cond` holds.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::Configuration(format!($($arg)+)));
        }
    };
}

/// Return `Error::ShapeMismatch` unless `cond` holds.
macro_rules! ensure_shape {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::ShapeMismatch(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_config;
pub(crate) use ensure_shape;

#[cfg(test)]
mod tests {
    use super::*;

    fn needs_even(n: usize) -> Result<usize> {
        ensure_config!(n % 2 == 0, "length {n} must be even");
        Ok(n)
    }

    fn needs_match(a: usize, b: usize) -> Result<()> {
        ensure_shape!(a == b, "{a} != {b}");
        Ok(())
    }

    #[test]
    fn test_ensure_config_passes_and_fails() {
        assert_eq!(needs_even(14).unwrap(), 14);
        let err = needs_even(13).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("length 13 must be even"));
    }

    #[test]
    fn test_ensure_shape() {
        assert!(needs_match(3, 3).is_ok());
        assert!(matches!(needs_match(3, 4), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_program_build_message_carries_log() {
        let err = Error::ProgramBuild {
            program: "decimate_filter".into(),
            log: "error: unknown identifier `tapz`".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("decimate_filter"));
        assert!(msg.contains("unknown identifier"));
    }
}
