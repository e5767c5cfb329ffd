//! Command-line interface definitions
//!
//! Defines all CLI commands and arguments using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ledgerkv - inspect and edit a database directory from the shell
#[derive(Parser, Debug)]
#[command(name = "ledgerkv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Database directory (overrides the config file)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// JSON options file; missing fields take their defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set a string value
    Set {
        key: String,
        value: String,

        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Get a string value
    Get { key: String },

    /// Delete a string key
    Del { key: String },

    /// Add to an integer string value
    Incr {
        key: String,

        #[arg(long, default_value = "1", allow_hyphen_values = true)]
        by: i64,
    },

    /// Remaining time to live of a string key
    Ttl { key: String },

    /// List string keys
    Keys {
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Push values onto the head of a list
    Lpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Push values onto the tail of a list
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Pop from the head of a list
    Lpop { key: String },

    /// Pop from the tail of a list
    Rpop { key: String },

    /// Elements of a list between two indices
    Lrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        end: i64,
    },

    /// Set hash fields from field/value pairs
    Hset {
        key: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Get a hash field
    Hget { key: String, field: String },

    /// Delete hash fields
    Hdel {
        key: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// All fields and values of a hash
    Hgetall { key: String },

    /// Add set members
    Sadd {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Remove set members
    Srem {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Members of a set
    Smembers { key: String },

    /// Add a sorted-set member
    Zadd {
        key: String,
        #[arg(allow_hyphen_values = true)]
        score: f64,
        member: String,
    },

    /// Score of a sorted-set member
    Zscore { key: String, member: String },

    /// Sorted-set members between two ranks
    Zrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        stop: i64,

        #[arg(long)]
        with_scores: bool,
    },

    /// Run a compaction cycle now
    Compact {
        /// Data type to compact (strs, list, hash, sets, zset); all if omitted
        #[arg(long = "type")]
        data_type: Option<String>,

        /// Discard ratio threshold (defaults to the configured ratio)
        #[arg(long)]
        ratio: Option<f64>,
    },

    /// Show segment layout and engine metrics
    Stats,
}
