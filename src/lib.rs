//! Reconstructs a single video file from a published BigBlueButton-style
//! recording's web-served artifacts: fetch, parse, compile a frame
//! timeline, render it with a headless browser pool, and mux the result
//! with the screen-share and webcam audio tracks.

pub mod batch;
pub mod cli;
pub mod context;
pub mod cutlist;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod server;
pub mod timeline;
pub mod transcode;
pub mod url;
