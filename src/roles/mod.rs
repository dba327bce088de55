//! Harness roles: the publishing worker pool and the subscriber.

pub mod publisher;
pub mod subscriber;
