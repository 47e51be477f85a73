//! # Pipeline Common
//!
//! This crate provides common plumbing for building staged media pipelines.
//! Stages run on their own threads and hand data to each other through
//! bounded queues; out-of-band requests travel backwards through mailboxes.
//!
//! ## Features
//!
//! - [`SyncQueue`]: a bounded blocking queue used as the stage-to-stage handoff
//! - [`Mailbox`]: an unbounded queue with non-blocking receive for control messages

mod mailbox;
mod queue;

pub use mailbox::Mailbox;
pub use queue::SyncQueue;
