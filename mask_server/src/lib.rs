//! Face mask detection on browser webcam streams.
//!
//! Frames arrive per connection, are decoded to RGB, run through a detection model loaded once at
//! startup, annotated with boxes and labels and sent back in their original pixel format.
pub mod categories;
pub mod codec;
pub mod data_socket;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod processor;
pub mod session;

#[cfg(test)]
mod testing;
