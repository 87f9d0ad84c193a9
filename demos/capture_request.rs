use std::sync::Arc;
use std::time::Duration;

use camreq::driver::{ids, FrameClock, VirtualCamera};
use camreq::{Camera, CameraConfiguration, CompletionMode, EventLoop, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let driver = VirtualCamera::shared("virtual0");
    let camera = Camera::open(Arc::clone(&driver))?;
    camera.configure(&CameraConfiguration::preview())?;
    camera.start()?;
    let _clock = FrameClock::start(Arc::clone(&driver), Duration::from_millis(33));
    let _event_loop = EventLoop::start(&camera)?;

    for exposure in [10_000, 20_000, 40_000] {
        camera.set_control(ids::EXPOSURE_TIME, exposure);
        let Some(frame) = camera.capture_request(true, CompletionMode::default())? else {
            println!("session stopped");
            break;
        };
        let metadata = frame.metadata()?;
        println!(
            "frame {} (generation {}): exposure {:?}",
            frame.sequence(),
            frame.generation(),
            metadata.get(ids::EXPOSURE_TIME)
        );
        frame.release()?;
    }

    if let Some(metadata) = camera.capture_metadata(true, CompletionMode::default())? {
        for (id, value) in metadata.iter() {
            println!("{id}: {value}");
        }
    }

    camera.close()?;
    Ok(())
}
