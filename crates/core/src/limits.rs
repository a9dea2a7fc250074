//! Size limits for keys, values and batches
//!
//! Enforced client-side before a request is sent. Violations are
//! programming errors (`IllegalArgument`) and are never retried.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::Value;

/// Argument limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum encoded key length in bytes (default: 64KB)
    pub max_key_bytes: usize,

    /// Maximum value length in bytes (default: 16MB)
    pub max_value_bytes: usize,

    /// Maximum operations in one execute batch (default: 1000)
    pub max_batch_operations: usize,

    /// Maximum records per iteration batch (default: 10000)
    pub max_batch_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: 64 * 1024,
            max_value_bytes: 16 * 1024 * 1024,
            max_batch_operations: 1000,
            max_batch_size: 10_000,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_key_bytes: 64,
            max_value_bytes: 256,
            max_batch_operations: 4,
            max_batch_size: 16,
        }
    }

    /// Validate an encoded key length
    pub fn validate_key(&self, key: &Key) -> Result<()> {
        let len = key.to_bytes().len();
        if len > self.max_key_bytes {
            return Err(Error::illegal_argument(format!(
                "key {} is {} bytes, limit is {}",
                key, len, self.max_key_bytes
            )));
        }
        Ok(())
    }

    /// Validate a value length
    pub fn validate_value(&self, value: &Value) -> Result<()> {
        if value.len() > self.max_value_bytes {
            return Err(Error::illegal_argument(format!(
                "value is {} bytes, limit is {}",
                value.len(),
                self.max_value_bytes
            )));
        }
        Ok(())
    }

    /// Validate an iteration batch size
    pub fn validate_batch_size(&self, batch_size: usize) -> Result<()> {
        if batch_size == 0 || batch_size > self.max_batch_size {
            return Err(Error::illegal_argument(format!(
                "batch size must be between 1 and {}, got {}",
                self.max_batch_size, batch_size
            )));
        }
        Ok(())
    }
}
