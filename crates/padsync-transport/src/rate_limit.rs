//! Per-connection rate limiting using the token bucket algorithm

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rate limit configuration; a rate of 0 disables that lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained commands per second
    pub commands_per_second: u32,
    /// Command burst capacity
    pub command_burst: u32,
    /// Sustained cursor frames per second
    pub cursor_frames_per_second: u32,
    /// Cursor frame burst capacity
    pub cursor_burst: u32,
}

impl RateLimitConfig {
    /// No limits on either lane
    pub fn unlimited() -> Self {
        Self {
            commands_per_second: 0,
            command_burst: 0,
            cursor_frames_per_second: 0,
            cursor_burst: 0,
        }
    }

    /// Limit commands only, with burst = 2x rate
    pub fn from_rate(commands_per_second: u32) -> Self {
        Self {
            commands_per_second,
            command_burst: commands_per_second.saturating_mul(2),
            ..Self::default()
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // A 16 ms frame loop produces ~62 frames/s per participant
        Self {
            commands_per_second: 200,
            command_burst: 400,
            cursor_frames_per_second: 90,
            cursor_burst: 90,
        }
    }
}

/// Token bucket
///
/// Allows bursting up to `capacity` requests, then limits to `rate` per
/// second. Tokens refill continuously.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            rate: f64::from(rate),
            last_refill: Instant::now(),
        }
    }

    /// Try to take one token
    pub fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
    }
}

/// The two lanes of one connection
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    commands: Option<TokenBucket>,
    cursors: Option<TokenBucket>,
}

impl ConnectionLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let lane = |rate: u32, burst: u32| (rate > 0).then(|| TokenBucket::new(rate, burst.max(rate)));

        Self {
            commands: lane(config.commands_per_second, config.command_burst),
            cursors: lane(config.cursor_frames_per_second, config.cursor_burst),
        }
    }

    /// Admit a regular command; rejected commands get `RATE_LIMITED`
    pub fn admit_command(&mut self) -> bool {
        self.commands.as_mut().map_or(true, TokenBucket::try_acquire)
    }

    /// Admit a cursor frame; rejected frames are dropped without an error
    pub fn admit_cursor(&mut self) -> bool {
        self.cursors.as_mut().map_or(true, TokenBucket::try_acquire)
    }
}
