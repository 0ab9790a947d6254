//! edos-loadgen — synthetic request load against the worker pool.
//!
//! A `LoadGeneratorPool` runs N paced workers, each bound to one target
//! endpoint chosen round-robin when the pool starts. The pool never
//! retargets running workers: a topology change is handled by the owner
//! with a synchronous `stop()` followed by a fresh `start()`, or with
//! `restart()` which does both under the pool's lock.
//!
//! # Architecture
//!
//! ```text
//! LoadGeneratorPool
//!   ├── Mutex<Inner>          (Idle | Running generation)
//!   ├── generation
//!   │   ├── watch::Sender<bool>   stop signal, one per generation
//!   │   └── WorkerTask × N        request → measure RTT → pace
//!   ├── RequestSender         (HttpRequestSender in production)
//!   └── LoadStats             one mutex: totals + RTT samples
//! ```

pub mod client;
pub mod error;
pub mod pool;
pub mod sender;
pub mod stats;
mod worker;

pub use client::HttpRequestSender;
pub use error::LoadGenError;
pub use pool::LoadGeneratorPool;
pub use sender::{RequestOutcome, RequestSender};
pub use stats::{LoadReport, LoadStats};
pub use worker::WorkerSummary;
