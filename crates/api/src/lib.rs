//! HTTP surface of the video-to-3D service: upload, status polling, job
//! management, artifact download and WebSocket progress.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
