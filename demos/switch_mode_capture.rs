use std::sync::Arc;
use std::time::Duration;

use camreq::driver::{FrameClock, VirtualCamera};
use camreq::{Camera, CameraConfiguration, CameraOptions, CompletionMode, EventLoop, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = match std::env::args().nth(1) {
        Some(path) => CameraOptions::from_json_file(path)?,
        None => CameraOptions::default(),
    };

    let driver = VirtualCamera::shared("virtual0");
    let camera = Camera::open_with(Arc::clone(&driver), options)?;
    camera.configure(&CameraConfiguration::preview())?;
    camera.start()?;
    let _clock = FrameClock::start(Arc::clone(&driver), Duration::from_millis(33));
    let _event_loop = EventLoop::start(&camera)?;

    let still = CameraConfiguration::still();
    let path = std::env::temp_dir().join("camreq-still.jpg");
    if let Some(metadata) = camera.switch_mode_and_capture_file(&still, &path, true, CompletionMode::default())? {
        println!("saved {} ({} metadata entries)", path.display(), metadata.len());
    }

    if let Some(array) = camera.switch_mode_and_capture_array(&still, 0, true, CompletionMode::default())? {
        println!("still array shape: {:?}", array.dim());
    }
    println!(
        "back in {:?}, generation {}",
        camera.configuration().map(|c| c.streams[0].role),
        camera.generation()
    );

    camera.close()?;
    Ok(())
}
