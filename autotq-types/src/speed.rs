//! Transfer speed profiles
//!
//! The device drains its UART in small bursts. Slower profiles write less
//! per burst and wait longer between bursts; they trade throughput for
//! robustness on noisy hubs and long cables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Named transfer speed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
    Ultrafast,
}

/// Chunking parameters used while streaming a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedProfile {
    /// Logical chunk size advertised in `download_file`
    pub chunk_size: usize,

    /// Bytes per physical write
    pub write_size: usize,

    /// Pause between physical writes
    pub write_delay: Duration,
}

impl TransferSpeed {
    pub const ALL: [TransferSpeed; 4] = [Self::Slow, Self::Normal, Self::Fast, Self::Ultrafast];

    pub fn name(self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Normal => "normal",
            Self::Fast => "fast",
            Self::Ultrafast => "ultrafast",
        }
    }

    pub fn profile(self) -> SpeedProfile {
        let (chunk_size, write_size, delay_ms) = match self {
            Self::Slow => (512, 64, 10),
            Self::Normal => (1024, 64, 2),
            Self::Fast => (2048, 128, 2),
            Self::Ultrafast => (4096, 256, 1),
        };

        SpeedProfile {
            chunk_size,
            write_size,
            write_delay: Duration::from_millis(delay_ms),
        }
    }
}

impl FromStr for TransferSpeed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|speed| speed.name() == wanted)
            .ok_or_else(|| {
                Error::Parse(format!(
                    "unknown speed '{}', expected one of slow, normal, fast, ultrafast",
                    s
                ))
            })
    }
}

impl fmt::Display for TransferSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SpeedProfile {
    /// Physical writes needed for one logical chunk
    pub fn writes_per_chunk(&self) -> usize {
        self.chunk_size.div_ceil(self.write_size.max(1))
    }

    /// Reject profiles that would stall the transfer loop
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.write_size == 0 {
            return Err(Error::Validation(
                "chunk and write sizes must be non-zero".into(),
            ));
        }
        if self.write_size > self.chunk_size {
            return Err(Error::Validation(format!(
                "write size {} exceeds chunk size {}",
                self.write_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for SpeedProfile {
    fn default() -> Self {
        TransferSpeed::default().profile()
    }
}
