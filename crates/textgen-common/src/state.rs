use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{GenError, Result};

pub const DEFAULT_MAX_NEW_TOKENS: usize = 1024;

/// Seed value requesting a freshly drawn random seed.
pub const RANDOM_SEED: i64 = -1;

/// Per-request generation options.
///
/// The bag is kept opaque so options meant for a particular backend pass
/// through untouched; only a handful of keys are interpreted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationState(Map<String, Value>);

impl GenerationState {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

    pub fn contains(&self, key: &str) -> bool { self.0.contains_key(key) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Returns `self` with every key of `overrides` replacing its own.
    pub fn merged(&self, overrides: &GenerationState) -> GenerationState {
        let mut out = self.clone();
        for (k, v) in &overrides.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> { self.get(key).and_then(Value::as_bool) }

    pub fn get_f64(&self, key: &str) -> Option<f64> { self.get(key).and_then(Value::as_f64) }

    pub fn get_u64(&self, key: &str) -> Option<u64> { self.get(key).and_then(Value::as_u64) }

    pub fn stream(&self) -> bool { self.get_bool("stream").unwrap_or(false) }

    pub fn set_stream(&mut self, stream: bool) { self.set("stream", stream); }

    /// Tokens-per-second ceiling for streamed output; `0.0` means uncapped.
    pub fn max_tokens_second(&self) -> f64 {
        self.get_f64("max_tokens_second").filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0)
    }

    /// The requested seed, [`RANDOM_SEED`] when absent.
    ///
    /// Integers, integral floats and strings holding an integer are accepted.
    pub fn seed(&self) -> Result<i64> {
        let Some(value) = self.get("seed") else { return Ok(RANDOM_SEED) };
        match value {
            Value::Null => Ok(RANDOM_SEED),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(i);
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Ok(f as i64),
                    _ => Err(GenError::InvalidSeed(n.to_string())),
                }
            }
            Value::String(s) => s.trim().parse().map_err(|_| GenError::InvalidSeed(s.clone())),
            other => Err(GenError::InvalidSeed(other.to_string())),
        }
    }

    pub fn set_seed(&mut self, seed: u64) { self.set("seed", seed); }

    /// Extra stop strings carried by the state.
    ///
    /// Accepts a JSON array of strings or a string of comma-separated,
    /// double-quoted literals such as `"\nYou:", "###"`.
    pub fn custom_stopping_strings(&self) -> Result<Vec<String>> {
        let invalid = |reason: String| GenError::InvalidOption { key: "custom_stopping_strings".into(), reason };
        match self.get("custom_stopping_strings") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
            Some(Value::String(s)) => {
                serde_json::from_str::<Vec<String>>(&format!("[{s}]")).map_err(|e| invalid(e.to_string()))
            }
            Some(v @ Value::Array(_)) => {
                serde_json::from_value::<Vec<String>>(v.clone()).map_err(|e| invalid(e.to_string()))
            }
            Some(other) => Err(invalid(format!("expected a list of strings, got {other}"))),
        }
    }

    pub fn truncation_length(&self) -> Option<usize> {
        self.get_u64("truncation_length").map(|v| v as usize)
    }

    pub fn max_new_tokens(&self) -> usize {
        self.get_u64("max_new_tokens").map(|v| v as usize).unwrap_or(DEFAULT_MAX_NEW_TOKENS)
    }

    pub fn add_bos_token(&self) -> bool { self.get_bool("add_bos_token").unwrap_or(true) }

    pub fn skip_special_tokens(&self) -> bool { self.get_bool("skip_special_tokens").unwrap_or(true) }
}

impl From<Map<String, Value>> for GenerationState {
    fn from(map: Map<String, Value>) -> Self { Self(map) }
}

/// Sampling configuration handed to a batch backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repetition_penalty: f64,
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub num_beams: u32,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.3,
            top_k: 40,
            repetition_penalty: 1.0,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            do_sample: true,
            num_beams: 1,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn from_state(state: &GenerationState) -> Self {
        let d = Self::default();
        Self {
            temperature: state.get_f64("temperature").unwrap_or(d.temperature),
            top_p: state.get_f64("top_p").unwrap_or(d.top_p),
            top_k: state.get_u64("top_k").map(|v| v as u32).unwrap_or(d.top_k),
            repetition_penalty: state.get_f64("repetition_penalty").unwrap_or(d.repetition_penalty),
            max_new_tokens: state.max_new_tokens(),
            do_sample: state.get_bool("do_sample").unwrap_or(d.do_sample),
            num_beams: state.get_u64("num_beams").map(|v| v as u32).unwrap_or(d.num_beams),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
