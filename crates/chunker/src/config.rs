use serde::{Deserialize, Serialize};

/// Configuration for text chunking behavior.
///
/// All sizes are expressed in characters of the normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk length (hard limit)
    pub chunk_size: usize,

    /// Maximum number of characters shared by two adjacent chunks
    pub overlap: usize,

    /// Documents shorter than this (after normalization) produce no chunks
    pub min_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
            min_chunk_chars: 50,
        }
    }
}

impl ChunkerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.overlap >= self.chunk_size {
            return Err(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ChunkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.overlap, 50);
    }

    #[test]
    fn config_validation() {
        let mut config = ChunkerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.chunk_size = 100;
        config.overlap = 100;
        assert!(config.validate().is_err());

        config.overlap = 99;
        assert!(config.validate().is_ok());

        config.overlap = 0;
        assert!(config.validate().is_ok());
    }
}
