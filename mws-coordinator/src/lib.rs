//! Multi-instance workspace coordinator.
//!
//! A [`Coordinator`] implements [`mws_executor::Executor`] on top of many
//! instance directories under one root, each driven by its own child
//! executor. Routing state lives in two JSON documents under
//! `<root>/.multiworkspace/` so it survives restarts:
//!
//! - `control.json` ([`ControlState`]) asks for a new instance, pins a target
//!   and schedules garbage collection.
//! - `instances.json` ([`InstanceRegistry`]) lists the known instances and
//!   the currently-selected one.

pub mod cache;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod gc;
pub mod keys;
pub mod registry;
pub mod store;
pub mod target;

pub use config::{CoordinatorConfig, CoordinatorSettings};
pub use control::{ControlState, GcDirective};
pub use coordinator::Coordinator;
pub use gc::GcReport;
pub use registry::{InstanceKey, InstanceRegistry};
pub use store::MetadataStore;
