//! Per-node protocol configuration.
//!
//! [`TcpConfig`] can be built directly (it implements [`Default`]) or from
//! the `KEY VALUE` pairs of a node configuration file:
//!
//! | key                           | values                         | default |
//! |-------------------------------|--------------------------------|---------|
//! | `TCP-DELAY-ACKS`              | `YES` / `NO`                   | `NO`    |
//! | `TCP-SEND-BUFFER`             | bytes                          | 16384   |
//! | `TCP-RECEIVE-BUFFER`          | bytes, at most 65535           | 16384   |
//! | `TCP-MSS`                     | bytes, at least 64             | 1024    |
//! | `TCP-STATISTICS`              | `YES` / `NO`                   | `NO`    |
//! | `TCP-TRACE`                   | `TCPDUMP-ASCII` / `NONE`       | `NONE`  |
//! | `TCP-TRACE-DIRECTION`         | `BOTH` / `INPUT` / `OUTPUT`    | `BOTH`  |
//! | `TCP-RANDOM-DROP-PERCENT`     | 0.0 ..= 100.0                  | 0.0     |
//! | `TCP-VERIFICATION-DROP-COUNT` | 0 ..= 4                        | 0       |
//!
//! Buffer and segment sizes that are zero or negative fall back to their
//! default.  Cross-field limits are checked by [`TcpConfig::validate`].

use thiserror::Error;

use crate::ccb::AppType;
use crate::congestion::MAX_WIN;

pub const DEFAULT_MSS: usize = 1024;
pub const MIN_MSS: usize = 64;
pub const DEFAULT_SEND_BUFFER: usize = 16384;
pub const DEFAULT_RECV_BUFFER: usize = 16384;

/// Data sequence numbers dropped once each by the verification drop knob.
pub const VERIFICATION_DROP_SEQS: [u32; 4] = [14001, 28001, 26001, 24001];

/// Which segments the trace writer records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceDirection {
    #[default]
    Both,
    Input,
    Output,
}

impl TraceDirection {
    pub fn includes_input(self) -> bool {
        matches!(self, TraceDirection::Both | TraceDirection::Input)
    }

    pub fn includes_output(self) -> bool {
        matches!(self, TraceDirection::Both | TraceDirection::Output)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("TCP-MSS: {0} is below the minimum of {}", MIN_MSS)]
    MssBelowMinimum(usize),
    #[error("TCP-SEND-BUFFER: {send_buffer} is below the MSS of {mss}")]
    SendBufferBelowMss { send_buffer: usize, mss: usize },
    #[error("TCP-RECEIVE-BUFFER: {0} exceeds the maximum window of {}", MAX_WIN)]
    RecvBufferAboveMaxWindow(usize),
    #[error("TCP-RANDOM-DROP-PERCENT: {0} is outside 0..=100")]
    DropPercentOutOfRange(f64),
    #[error("TCP-VERIFICATION-DROP-COUNT: {0} is outside 0..=4")]
    VerificationDropCountOutOfRange(i64),
    #[error("{key}: unknown value {value:?}")]
    UnknownValue { key: String, value: String },
    #[error("{key}: {value:?} is not a number")]
    InvalidNumber { key: String, value: String },
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TcpConfig {
    /// Acknowledge only every second full-size segment.
    pub delayed_ack: bool,
    pub send_buffer: usize,
    pub recv_buffer: usize,
    pub mss: usize,
    /// Print [`crate::stats::TcpStats::summary`] at teardown.
    pub statistics: bool,
    pub trace: bool,
    pub trace_direction: TraceDirection,
    /// Percentage of inbound data segments discarded at random.
    pub random_drop_percent: f64,
    /// How many entries of [`VERIFICATION_DROP_SEQS`] are active.
    pub verification_drop_count: usize,
    /// Seed of the instance's random stream.
    pub seed: u64,
    /// Application types whose connection is removed outright on close.
    pub release_on_close: Vec<AppType>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            delayed_ack: false,
            send_buffer: DEFAULT_SEND_BUFFER,
            recv_buffer: DEFAULT_RECV_BUFFER,
            mss: DEFAULT_MSS,
            statistics: false,
            trace: false,
            trace_direction: TraceDirection::Both,
            random_drop_percent: 0.0,
            verification_drop_count: 0,
            seed: 0,
            release_on_close: Vec::new(),
        }
    }
}

impl TcpConfig {
    /// Apply `pairs` on top of the defaults, then validate.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply a single configuration key.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "TCP-DELAY-ACKS" => self.delayed_ack = yes_no(key, value)?,
            "TCP-STATISTICS" => self.statistics = yes_no(key, value)?,
            "TCP-SEND-BUFFER" => {
                self.send_buffer = positive_or(key, value, DEFAULT_SEND_BUFFER)?
            }
            "TCP-RECEIVE-BUFFER" => {
                self.recv_buffer = positive_or(key, value, DEFAULT_RECV_BUFFER)?
            }
            "TCP-MSS" => self.mss = positive_or(key, value, DEFAULT_MSS)?,
            "TCP-TRACE" => {
                self.trace = match value {
                    "TCPDUMP-ASCII" => true,
                    "NONE" => false,
                    _ => return Err(unknown_value(key, value)),
                }
            }
            "TCP-TRACE-DIRECTION" => {
                self.trace_direction = match value {
                    "BOTH" => TraceDirection::Both,
                    "INPUT" => TraceDirection::Input,
                    "OUTPUT" => TraceDirection::Output,
                    _ => return Err(unknown_value(key, value)),
                }
            }
            "TCP-RANDOM-DROP-PERCENT" => {
                let pct: f64 = parse(key, value)?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(ConfigError::DropPercentOutOfRange(pct));
                }
                self.random_drop_percent = pct;
            }
            "TCP-VERIFICATION-DROP-COUNT" => {
                let count: i64 = parse(key, value)?;
                if !(0..=VERIFICATION_DROP_SEQS.len() as i64).contains(&count) {
                    return Err(ConfigError::VerificationDropCountOutOfRange(count));
                }
                self.verification_drop_count = count as usize;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Check the limits that span several fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss < MIN_MSS {
            return Err(ConfigError::MssBelowMinimum(self.mss));
        }
        if self.send_buffer < self.mss {
            return Err(ConfigError::SendBufferBelowMss {
                send_buffer: self.send_buffer,
                mss: self.mss,
            });
        }
        if self.recv_buffer > MAX_WIN as usize {
            return Err(ConfigError::RecvBufferAboveMaxWindow(self.recv_buffer));
        }
        if !(0.0..=100.0).contains(&self.random_drop_percent) {
            return Err(ConfigError::DropPercentOutOfRange(self.random_drop_percent));
        }
        if self.verification_drop_count > VERIFICATION_DROP_SEQS.len() {
            return Err(ConfigError::VerificationDropCountOutOfRange(
                self.verification_drop_count as i64,
            ));
        }
        Ok(())
    }
}

fn unknown_value(key: &str, value: &str) -> ConfigError {
    ConfigError::UnknownValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn yes_no(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(unknown_value(key, value)),
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn positive_or(key: &str, value: &str, default: usize) -> Result<usize, ConfigError> {
    let n: i64 = parse(key, value)?;
    Ok(if n > 0 { n as usize } else { default })
}
