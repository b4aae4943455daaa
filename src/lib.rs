//! # respguard
//!
//! **Inline sensitive-data detection for relayed HTTP responses.**
//!
//! respguard sits behind a forward relay, receives every completed response,
//! and scans its body in the background for credentials, personal data and
//! other material that should not be served. The relay never waits on a scan:
//! when all workers are busy the body is simply not scanned.
//!
//! ## Architecture
//!
//! - **[`pipeline`]** - relay-facing entry point; returns responses unchanged
//! - **[`scheduler`]** - content dedup, bounded non-blocking admission, scan tasks
//! - **[`charset`]** - detects the body's encoding and converts it to UTF-8
//! - **[`dlp`]** - rule compilation and the filter engine
//! - **[`dedup`]** - concurrent "seen" maps for body fingerprints and findings
//! - **[`sink`]** - where finding lines go (console, JSON, memory)
//! - **[`config`]** - TOML configuration and rule hot reload
//! - **[`relay`]** - plain-HTTP forward relay that feeds the pipeline
//! - **[`cli`]** - command-line interface (clap)
//! - **[`error`]** - unified error type using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write the default configuration
//! respguard init
//!
//! # Start the relay with 20 scan workers
//! respguard listen 127.0.0.1:8081 --threads 20
//!
//! # Route traffic through it
//! export HTTP_PROXY=http://127.0.0.1:8081
//! ```

pub mod charset;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod dlp;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod scheduler;
pub mod sink;
