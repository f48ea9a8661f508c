//! Background tasks that bridge the job pipeline to connected clients.
//!
//! The progress forwarder subscribes to the reporter's process-wide feed and
//! pushes every job event to the WebSocket connections following that job.

pub mod progress;
