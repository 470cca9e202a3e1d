use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a percentage in 0..=100, got {value}")]
    Percentage { name: &'static str, value: u8 },
    #[error("window size must be at least 1")]
    EmptyWindow,
    #[error("{name} must be a positive number of seconds, got {value}")]
    Duration { name: &'static str, value: f64 },
    #[error("latency range {min}..={max} is empty")]
    Latency { min: u64, max: u64 },
}

/// Fault profile applied by a faulty channel to every datagram it carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Probability (percent) that a datagram is dropped.
    pub loss_pct: u8,
    /// Probability (percent) that one payload byte is bit-flipped.
    pub corrupt_pct: u8,
}

impl FaultConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_pct("loss_pct", self.loss_pct)?;
        check_pct("corrupt_pct", self.corrupt_pct)
    }
}

/// Knobs of the Go-Back-N engines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum number of outstanding packets.
    pub window_size: u32,
    /// Retransmission timeout in seconds.
    pub rto_sec: f64,
    /// Receiver silence before it re-sends its last ack.
    pub idle_ack_sec: f64,
    /// Consecutive timeouts without progress before the sender gives up.
    /// Zero, the default, retries forever.
    pub max_stalled_timeouts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            rto_sec: 0.5,
            idle_ack_sec: 1.0,
            max_stalled_timeouts: 0,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        check_secs("rto_sec", self.rto_sec)?;
        check_secs("idle_ack_sec", self.idle_ack_sec)
    }

    pub fn rto_ms(&self) -> u64 {
        secs_to_ms(self.rto_sec)
    }

    pub fn idle_ack_ms(&self) -> u64 {
        secs_to_ms(self.idle_ack_sec)
    }
}

/// Simulated link between one server and one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub fault: FaultConfig,
    /// Probability (percent) that a delivered datagram arrives twice.
    pub duplicate_pct: u8,
    /// One-way latency bounds in virtual milliseconds. A wide range lets
    /// datagrams overtake each other.
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fault: FaultConfig::default(),
            duplicate_pct: 0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fault.validate()?;
        check_pct("duplicate_pct", self.duplicate_pct)?;
        if self.min_latency > self.max_latency {
            return Err(ConfigError::Latency {
                min: self.min_latency,
                max: self.max_latency,
            });
        }
        Ok(())
    }
}

fn check_pct(name: &'static str, value: u8) -> Result<(), ConfigError> {
    if value > 100 {
        return Err(ConfigError::Percentage { name, value });
    }
    Ok(())
}

fn check_secs(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::Duration { name, value });
    }
    Ok(())
}

fn secs_to_ms(secs: f64) -> u64 {
    ((secs * 1000.0).round() as u64).max(1)
}
