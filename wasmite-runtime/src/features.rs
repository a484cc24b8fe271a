//! The set of enabled post-1.0 proposals.
//!
//! The decoder, the validator, and the IR lowerer consult this set before
//! accepting a construct that does not exist in WebAssembly Core 1.0.

use {std::fmt, thiserror::Error};

/// A bitset of enabled feature proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(u32);

/// The mutable-global proposal, finished in 1.0 and therefore on by default.
pub const MUTABLE_GLOBAL: Features = Features(1);
/// Saturating (non-trapping) float-to-int truncation instructions.
pub const NON_TRAPPING_FLOAT_TO_INT: Features = Features(1 << 1);
/// `i32.extend8_s` and friends.
pub const SIGN_EXTENSION_OPS: Features = Features(1 << 2);
/// Multiple results in function and block types.
pub const MULTI_VALUE: Features = Features(1 << 3);
/// Bulk memory/table instructions and passive segments. Merged with
/// [REFERENCE_TYPES] upstream, so the configuration layer always co-sets the
/// two.
pub const BULK_MEMORY_OPERATIONS: Features = Features(1 << 4);
/// funcref/externref values, typed select, and the table instructions.
pub const REFERENCE_TYPES: Features = Features(1 << 5);

/// Features in the WebAssembly Core Specification 1.0 (20191205).
pub const FEATURES_CORE_1: Features = MUTABLE_GLOBAL;
/// Features in the WebAssembly Core Specification 2.0 draft (20220419).
pub const FEATURES_CORE_2: Features = Features(
    MUTABLE_GLOBAL.0
        | NON_TRAPPING_FLOAT_TO_INT.0
        | SIGN_EXTENSION_OPS.0
        | MULTI_VALUE.0
        | BULK_MEMORY_OPERATIONS.0
        | REFERENCE_TYPES.0,
);

/// The error produced when a construct requires a disabled feature. The
/// message shape is load-bearing: embedders match on it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{construct} is not supported as feature {feature} is disabled")]
pub struct FeatureError {
    pub construct: String,
    pub feature:   &'static str,
}

impl Features {
    pub fn set(self, feature: Features, enabled: bool) -> Features {
        if enabled {
            Features(self.0 | feature.0)
        } else {
            Features(self.0 & !feature.0)
        }
    }

    pub fn is_enabled(self, feature: Features) -> bool {
        self.0 & feature.0 == feature.0
    }

    /// Errs with the canonical gate message unless `feature` is enabled.
    /// `construct` names the gated construct, e.g. an instruction name.
    pub fn require(self, feature: Features, construct: impl fmt::Display) -> Result<(), FeatureError> {
        if self.is_enabled(feature) {
            Ok(())
        } else {
            Err(FeatureError {
                construct: construct.to_string(),
                feature:   feature.name(),
            })
        }
    }

    fn name(self) -> &'static str {
        match self {
            MUTABLE_GLOBAL => "mutable-global",
            NON_TRAPPING_FLOAT_TO_INT => "nontrapping-float-to-int-conversion",
            SIGN_EXTENSION_OPS => "sign-extension-ops",
            MULTI_VALUE => "multi-value",
            BULK_MEMORY_OPERATIONS => "bulk-memory-operations",
            REFERENCE_TYPES => "reference-types",
            _ => "unknown",
        }
    }
}
