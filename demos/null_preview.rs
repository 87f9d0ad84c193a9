use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use camreq::driver::{FrameClock, VirtualCamera};
use camreq::{Camera, CameraConfiguration, EventLoop, FrameHandle, Result};
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

    let shown = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&shown);
    let mut event_loop = EventLoop::start_with(&camera, move |_: &Camera, frame: FrameHandle| {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = frame.release() {
            eprintln!("release failed: {e}");
        }
    })?;

    for _ in 0..10 {
        thread::sleep(Duration::from_millis(100));
        println!(
            "frames drained: {}, shown: {}",
            camera.frames_delivered(),
            shown.load(Ordering::Relaxed)
        );
    }

    camera.stop()?;
    event_loop.stop();
    camera.close()?;
    Ok(())
}
