//! Producer and consumer views over one region
//!
//! The producer allocates and stamps a frame, the consumer imports the
//! same handle the way a second process would after receiving it over IPC.
//!
//! Usage:
//! ```bash
//! DMASHARE_HEAP=memfd RUST_LOG=debug cargo run --example roundtrip
//! ```

use dmashare_core::{Platform, SharedBuffer, SyncDirection};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let platform = Platform::from_env()?;

    // Producer side
    let mut frame = SharedBuffer::allocate(&platform, 1920 * 1080 * 3 / 2)?;
    let msg = b"Hello from producer! This is a dma-buf.";
    frame.as_mut_slice()?[..msg.len()].copy_from_slice(msg);
    frame.set_frame_id(1)?;
    frame.sync(SyncDirection::ToDevice)?;

    let desc = frame.descriptor();
    println!(
        "Produced frame {} ({} bytes, region {} bytes)",
        frame.frame_id()?,
        desc.len,
        desc.mapped_len
    );

    // Consumer side
    let mut view = SharedBuffer::import(&platform, frame.try_clone_handle()?, desc.len, desc.mapped_len)?;
    view.sync(SyncDirection::FromDevice)?;
    let data = view.as_slice()?;
    println!(
        "Consumed frame {}: {}",
        view.frame_id()?,
        String::from_utf8_lossy(&data[..msg.len()])
    );

    view.release()?;
    frame.release()?;
    Ok(())
}
