//! Pagination configuration

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size policy applied when building cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Size used when the caller supplies neither `first` nor `last`
    pub default_page_size: u32,
    /// Upper bound requested sizes are clamped to
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PaginationConfig {
    /// Load from `ATTEST_PAGE_SIZE_DEFAULT` and `ATTEST_PAGE_SIZE_MAX`,
    /// falling back to the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            default_page_size: std::env::var("ATTEST_PAGE_SIZE_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.default_page_size),
            max_page_size: std::env::var("ATTEST_PAGE_SIZE_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_page_size),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_page_size == 0 {
            return Err(CoreError::invalid_argument(
                "max_page_size",
                "must be greater than zero",
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(CoreError::invalid_argument(
                "default_page_size",
                format!("must be between 1 and {}", self.max_page_size),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        keys: Vec<&'static str>,
    }

    impl EnvGuard {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            for (key, value) in pairs {
                std::env::set_var(key, value);
            }
            Self {
                keys: pairs.iter().map(|(k, _)| *k).collect(),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.keys {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PaginationConfig::default();
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.max_page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        let _guard = EnvGuard::set(&[
            ("ATTEST_PAGE_SIZE_DEFAULT", "10"),
            ("ATTEST_PAGE_SIZE_MAX", "not-a-number"),
        ]);
        let config = PaginationConfig::from_env();
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_validate_rejects_default_above_max() {
        let config = PaginationConfig {
            default_page_size: 50,
            max_page_size: 20,
        };
        assert!(config.validate().is_err());
    }
}
