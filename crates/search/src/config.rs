use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when a request gives no limit
    pub default_top_k: usize,
    /// Largest accepted limit
    pub max_top_k: usize,
    /// Threshold applied when a request gives none
    pub default_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            max_top_k: 100,
            default_threshold: 0.0,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_top_k == 0 {
            return Err("search.max_top_k must be > 0".to_string());
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(format!(
                "search.default_top_k must be in 1..={} (got {})",
                self.max_top_k, self.default_top_k
            ));
        }
        if !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(format!(
                "search.default_threshold must be in [0, 1] (got {})",
                self.default_threshold
            ));
        }
        Ok(())
    }
}
