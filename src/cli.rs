//! Command-line interface for careroute
//!
//! Provides argument parsing and subcommand handling for the careroute binary.

use clap::{Parser, Subcommand};

/// Cost-aware AI request router with a crisis override
#[derive(Parser)]
#[command(name = "careroute")]
#[command(version)]
#[command(about = "Cost-aware AI request router with a crisis override")]
#[command(
    long_about = "careroute answers each query from the cheapest adequate provider \
    (local templates, free-quota models, then paid models), tracks quota and cost, \
    and sends any query showing signs of crisis straight to a designated safety provider."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# careroute Configuration
# ========================
#
# This file configures the HTTP server, answer providers, quotas, the
# response cache, the crisis override and observability for careroute.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# Default provider timeout in seconds (can be overridden per-tier in [timeouts])
request_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Every query is classified into a tier ceiling and tried against providers
# from the cheapest tier up to that ceiling:
#
#   - local: deterministic template answers, no cost
#   - free: external models with a free quota
#   - premium: paid external models
#
# Within a tier, cheaper providers go first, then lower priority values.
#
# Provider fields:
#   - kind: "local_template", "openai_compatible" or "static"
#   - cost_per_unit: cost recorded in the ledger per consumed unit
#   - quota_limit / quota_window_seconds / quota_unit ("requests" or "tokens")
#   - user_quota_limit: per-user share of the quota window
#   - rate_limit / rate_window_seconds: sliding request window
#   - safety: exactly one provider answers crisis queries

[[providers]]
name = "local-templates"
kind = "local_template"
tier = "local"

[[providers.templates]]
patterns = ["hello", "hi", "hey"]
answer = "Hi! How can I help you today?"

[[providers.templates]]
patterns = ["what's the capital of france", "capital of france"]
answer = "The capital of France is Paris."

[[providers]]
name = "free-model"
kind = "openai_compatible"
tier = "free"
base_url = "https://free.example.com/v1"
model = "small-model"
api_key_env = "FREE_API_KEY"
cost_per_unit = 0.0
quota_limit = 1000
quota_window_seconds = 86400
quota_unit = "requests"
rate_limit = 30
rate_window_seconds = 60

[[providers]]
name = "premium-model"
kind = "openai_compatible"
tier = "premium"
base_url = "https://api.example.com/v1"
model = "large-model"
api_key_env = "PREMIUM_API_KEY"
cost_per_unit = 0.00002
quota_unit = "tokens"
max_tokens = 2048
temperature = 0.7
safety = true

# ─────────────────────────────────────────────────────────────────────────────
# CLASSIFIER
# ─────────────────────────────────────────────────────────────────────────────

[classifier]
# Local classifications below this confidence are routed to free instead
confidence_threshold = 0.4

# Extra crisis phrases, one per line (added to the built-in list)
# crisis_patterns_file = "crisis_patterns.txt"

# Previous queries per user feeding the classifier
context_turns = 3

# ─────────────────────────────────────────────────────────────────────────────
# CRISIS OVERRIDE
# ─────────────────────────────────────────────────────────────────────────────

[safety]
# Seconds to wait for the safety provider before answering statically
timeout_seconds = 20

# Append every safety event to this JSON lines file
# event_log = "safety_events.jsonl"

# ─────────────────────────────────────────────────────────────────────────────
# RESPONSE CACHE
# ─────────────────────────────────────────────────────────────────────────────

[cache]
enabled = true
ttl_seconds = 3600
capacity = 1024
semantic = true
similarity_threshold = 0.90
purge_interval_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# LIMITS, LEDGER AND PERSISTENCE
# ─────────────────────────────────────────────────────────────────────────────

[limits]
# Requests per user per window across external providers
# user_rate_limit = 60
user_rate_window_seconds = 60

[ledger]
# "daily" or "monthly"
period = "daily"

[persistence]
# Ledger totals and quota windows survive restarts when set
# state_file = "careroute_state.json"
flush_interval_seconds = 60

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# ─────────────────────────────────────────────────────────────────────────────
# TIMEOUTS (Optional)
# ─────────────────────────────────────────────────────────────────────────────
#
# Per-tier timeout overrides in seconds.
# If not specified, server.request_timeout_seconds is used.

[timeouts]
local = 2
free = 15
premium = 30
"#
}
