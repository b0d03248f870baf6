//! Persistent task scheduling and execution for the CLI proxy.
//!
//! A long-lived background service that owns user-defined jobs, decides when
//! each must next run, executes them against the proxy's loopback
//! chat-completions endpoint, records execution history, and fans results
//! out via webhooks.
//!
//! Three seams face the rest of the process:
//!
//! - [`Store`] — durable home for tasks and execution logs; the management
//!   HTTP layer CRUDs through it.
//! - [`Engine`] — the 5-second ticker that schedules and runs due tasks, at
//!   most one execution per task id at a time.
//! - [`Executor`] — the pluggable invocation capability; [`ChatExecutor`]
//!   drives the loopback endpoint and generates system reports.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cliproxy_scheduler::{
//!     ChatExecutor, ChatExecutorConfig, Engine, Store, WebhookDispatcher,
//! };
//!
//! # fn main() -> cliproxy_scheduler::Result<()> {
//! let store = Arc::new(Store::open("/var/lib/cliproxy/scheduler")?);
//! let executor = Arc::new(ChatExecutor::new(
//!     ChatExecutorConfig {
//!         base_url: "http://127.0.0.1:8317".to_string(),
//!         local_password: None,
//!     },
//!     store.clone(),
//!     Arc::new(WebhookDispatcher::new()),
//! ));
//! let engine = Engine::new(store, executor);
//! engine.start();
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod store;
pub mod task;
pub mod webhook;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, TICK_PERIOD};
pub use error::{Result, SchedulerError};
pub use executor::{ChatExecutor, ChatExecutorConfig, Executor};
pub use store::{Store, DEFAULT_LOG_CAP};
pub use task::{ExecutionLog, SharedTask, Task, TaskKind, TaskStatus};
pub use webhook::{TaskNotification, WebhookDispatcher};
