//! Character-based token estimation.
//!
//! The LLM gateway enforces a hard per-request token cap, but no tokenizer
//! for the hosted model is available locally. Estimates are therefore
//! derived from character counts with a base ratio tuned for source code,
//! plus two small bounded biases charged per non-blank line:
//!
//! - **length bias**: grows with the line's position in the file, since
//!   longer files carry more indentation and punctuation runs;
//! - **density bias**: applies to a non-blank line that directly follows
//!   another non-blank line.
//!
//! Each line's bias depends only on the text before and on that line, so
//! appending text never lowers an estimate. The combined bias never
//! exceeds [`MAX_TOTAL_BIAS`] over the base ratio. Estimates deliberately
//! err high: downstream code only needs a safety margin against the cap.
//!
//! # Example
//!
//! ```rust
//! use uplifter_core::tokens::estimate_tokens;
//!
//! let small = estimate_tokens("x = 1\n");
//! let large = estimate_tokens(&"x = 1\n".repeat(100));
//! assert!(small >= 3);
//! assert!(large > small);
//! ```

/// Upper bound on the combined biases added to the base ratio.
pub const MAX_TOTAL_BIAS: f64 = 0.08;

/// Line index at which the length bias saturates.
const LENGTH_BIAS_SATURATION_LINES: usize = 2000;

/// Tokens-per-character parameters for one kind of text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenProfile {
    pub base_ratio: f64,
    pub max_length_bias: f64,
    pub max_density_bias: f64,
}

impl TokenProfile {
    /// Profile for source code (~0.45 tokens per character).
    pub fn code() -> Self {
        Self {
            base_ratio: 0.45,
            max_length_bias: 0.03,
            max_density_bias: 0.05,
        }
    }

    /// Profile for prose and unknown text.
    pub fn prose() -> Self {
        Self {
            base_ratio: 0.30,
            max_length_bias: 0.02,
            max_density_bias: 0.02,
        }
    }

    /// Estimate the token count of `text`.
    ///
    /// Non-decreasing under appending: `estimate(a) <= estimate(a + b)`.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.weighted(text).ceil() as usize
    }

    /// The effective tokens-per-character ratio for `text`.
    pub fn ratio_for(&self, text: &str) -> f64 {
        let chars = text.chars().count();
        if chars == 0 {
            return self.base_ratio;
        }
        self.weighted(text) / chars as f64
    }

    /// Largest ratio this profile can ever produce.
    pub fn max_ratio(&self) -> f64 {
        self.base_ratio + (self.max_length_bias + self.max_density_bias).min(MAX_TOTAL_BIAS)
    }

    fn weighted(&self, text: &str) -> f64 {
        let chars = text.chars().count();
        let mut bias = 0.0;
        let mut previous_non_blank = false;
        for (index, line) in text.split('\n').enumerate() {
            let non_blank = !line.trim().is_empty();
            if non_blank {
                let length_fraction = index.min(LENGTH_BIAS_SATURATION_LINES) as f64
                    / LENGTH_BIAS_SATURATION_LINES as f64;
                let mut line_bias = self.max_length_bias * length_fraction;
                if previous_non_blank {
                    line_bias += self.max_density_bias;
                }
                bias += line.chars().count() as f64 * line_bias.min(MAX_TOTAL_BIAS);
            }
            previous_non_blank = non_blank;
        }
        chars as f64 * self.base_ratio + bias
    }
}

impl Default for TokenProfile {
    fn default() -> Self {
        Self::code()
    }
}

/// Estimate tokens for code text using the default code profile.
pub fn estimate_tokens(text: &str) -> usize {
    TokenProfile::code().estimate(text)
}
