//! Provisioning events and the audit sink they are recorded on.

pub mod audit;
pub mod event;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use event::Event;
