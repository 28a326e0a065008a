//! # Utility Modules
//!
//! Supporting utilities for compression, logging, and metrics.
//!
//! ## Components
//! - **Compression**: zlib with size limits and thresholds
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Decompression bomb protection (claimed sizes capped at the frame limit)
pub mod compression;
pub mod logging;
pub mod metrics;
