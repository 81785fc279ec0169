//! Exit code standardization for spotctl
//!
//! ## Exit Code Convention
//!
//! - `0` = Success (per-ASG errors are reported, not fatal)
//! - `1` = User error (invalid input, resource not found)
//! - `2` = System error (AWS API failure, network error)
//! - `3` = Configuration error (no regions, invalid defaults)

use crate::error::SpotctlError;

/// Standard exit codes for spotctl
pub mod codes {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// User error (invalid input, resource not found)
    pub const USER_ERROR: i32 = 1;
    /// System error (AWS API failure, network error)
    pub const SYSTEM_ERROR: i32 = 2;
    /// Configuration error (no regions, invalid defaults)
    pub const CONFIG_ERROR: i32 = 3;
}

/// Map a SpotctlError to an appropriate exit code
pub fn exit_code_for_error(error: &SpotctlError) -> i32 {
    use SpotctlError::*;
    match error {
        Config(_) => codes::CONFIG_ERROR,

        Validation { .. } => codes::USER_ERROR,
        InstanceNotFound(_) => codes::USER_ERROR,
        AsgNotFound(_) => codes::USER_ERROR,

        Ec2 { .. } => codes::SYSTEM_ERROR,
        AutoScaling { .. } => codes::SYSTEM_ERROR,
        Retryable { .. } => codes::SYSTEM_ERROR,
        WaitDeadline(_) => codes::SYSTEM_ERROR,
        DeadlineExceeded(_) => codes::SYSTEM_ERROR,
        SpotRequestIncomplete(_) => codes::SYSTEM_ERROR,
        Json(_) => codes::SYSTEM_ERROR,
    }
}
