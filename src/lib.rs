//! Conformance Engine - resumable execution of hierarchical conformance suites
//!
//! Test authors describe a tree of suites, groups and tests. The engine runs a
//! chosen node of that tree against a remote system under test, classifies every
//! leaf into a fixed result taxonomy, rolls results up the hierarchy, and can park
//! a run while it waits for an external event before resuming it later.
//!
//! ## Layout
//!
//! - [`models`]: the authored runnable tree and the persisted entities
//! - [`executor`]: signals, the test context, rollup, the `TestRunner` state machine
//!   and the `TestRunService` entry points
//! - [`jobs`]: synchronous / background dispatch of runs
//! - [`repository`]: persistence collaborators (in-memory and JSON files)
//! - [`suites`]: built-in suites bound to the engine
//! - [`output`]: result formatting
//! - [`http`]: the request client test bodies use against the system under test
//! - [`config`]: configuration file and environment settings
//! - [`utils`]: logging, timing and id helpers

pub mod config;
pub mod executor;
pub mod http;
pub mod jobs;
pub mod models;
pub mod output;
pub mod repository;
pub mod suites;
pub mod utils;
