//! Transformer configuration.
//!
//! Provides typed configuration with bon builders and environment variable
//! fallbacks.

use std::sync::Arc;

use bon::bon;
use qfuse_ir::{ExecutionProvider, ProviderSet};

use crate::error::*;

// ============================================================================
// APPLY MODE
// ============================================================================

/// How the transformer uses its rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ApplyMode {
    /// Run selectors and apply the first matching action.
    #[default]
    Direct,
    /// Run selectors and only record the matches.
    Save,
    /// Apply actions from previously saved matches without running selectors.
    Replay,
}

impl ApplyMode {
    /// Whether rules need their selectors in this mode.
    pub fn uses_selectors(&self) -> bool {
        !matches!(self, Self::Replay)
    }
}

// ============================================================================
// ACCURACY LEVEL
// ============================================================================

/// Minimum compute precision the block-quantized matmul kernel may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum AccuracyLevel {
    Unset = 0,
    Fp32 = 1,
    Fp16 = 2,
    Bf16 = 3,
    /// Activations may be quantized to int8 (default).
    #[default]
    Int8 = 4,
}

impl AccuracyLevel {
    pub fn from_i64(level: i64) -> Result<Self> {
        match level {
            0 => Ok(Self::Unset),
            1 => Ok(Self::Fp32),
            2 => Ok(Self::Fp16),
            3 => Ok(Self::Bf16),
            4 => Ok(Self::Int8),
            _ => InvalidConfigSnafu { reason: format!("accuracy level {level} is not in 0..=4") }.fail(),
        }
    }

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    /// Relative error the fused matmul may show against the DQ + MatMul reference.
    pub fn tolerance(&self) -> f32 {
        match self {
            Self::Unset | Self::Fp32 => 1e-5,
            Self::Fp16 => 1e-3,
            Self::Bf16 => 8e-3,
            Self::Int8 => 2e-2,
        }
    }
}

// ============================================================================
// TRANSFORM CONFIG
// ============================================================================

/// Providers any rule may target at all.
pub fn default_providers() -> ProviderSet {
    ExecutionProvider::Cpu | ExecutionProvider::Dml | ExecutionProvider::Acl | ExecutionProvider::Cuda
}

/// Construction-time parameters of a [`crate::Transformer`].
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub mode: ApplyMode,
    /// Allow signed 8-bit activations and weights in Conv/MatMul fusions.
    pub int8_allowed: bool,
    pub accuracy_level: AccuracyLevel,
    /// Providers whose nodes are considered at all.
    pub compatible_providers: ProviderSet,
    /// Pool used by the weight repack; `None` runs it on the calling thread.
    pub thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl TransformConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] mode: ApplyMode,
        #[builder(default = false)] int8_allowed: bool,
        #[builder(default)] accuracy_level: AccuracyLevel,
        #[builder(default = default_providers())] compatible_providers: ProviderSet,
        thread_pool: Option<Arc<rayon::ThreadPool>>,
    ) -> Self {
        Self { mode, int8_allowed, accuracy_level, compatible_providers, thread_pool }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `QFUSE_INT8_ALLOWED=1` - Allow signed 8-bit Conv/MatMul fusions
    /// * `QFUSE_MATMUL_NBITS_ACCURACY=N` - Accuracy level `0..=4` for MatMulNBits
    /// * `QFUSE_MODE=direct|save|replay` - Apply mode
    pub fn from_env() -> Result<Self> {
        let int8_allowed = std::env::var("QFUSE_INT8_ALLOWED").is_ok_and(|v| matches!(v.as_str(), "1" | "true"));

        let accuracy_level = match std::env::var("QFUSE_MATMUL_NBITS_ACCURACY") {
            Ok(level) => {
                let level = level.trim().parse::<i64>().map_err(|_| Error::InvalidConfig {
                    reason: format!("QFUSE_MATMUL_NBITS_ACCURACY='{level}' is not an integer"),
                })?;
                AccuracyLevel::from_i64(level)?
            }
            Err(_) => AccuracyLevel::default(),
        };

        let mode = match std::env::var("QFUSE_MODE") {
            Ok(mode) => mode
                .parse::<ApplyMode>()
                .map_err(|_| Error::InvalidConfig { reason: format!("QFUSE_MODE='{mode}' is not a known mode") })?,
            Err(_) => ApplyMode::default(),
        };

        Ok(Self::builder().mode(mode).int8_allowed(int8_allowed).accuracy_level(accuracy_level).build())
    }
}
