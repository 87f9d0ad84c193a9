/// The event loop thread serving blocking calls, driven by a virtual camera frame clock.
#[cfg(test)]
mod event_loop_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use camreq::driver::{ids, FrameClock, VirtualCamera};
    use camreq::{
        capture, Camera, CameraConfiguration, CameraError, CompletionMode, EventLoop, Operation, OperationStatus,
        Outcome, PixelFormat, StreamConfig, StreamRole,
    };
    use tracing_subscriber::EnvFilter;

    const TICK: Duration = Duration::from_millis(5);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn small_preview() -> CameraConfiguration {
        CameraConfiguration::new(vec![StreamConfig::new(StreamRole::Preview).with_size(64, 48)])
    }

    fn running_camera() -> (Arc<VirtualCamera>, Camera, FrameClock) {
        init_tracing();
        let driver = VirtualCamera::shared("virtual0");
        let camera = Camera::open(Arc::clone(&driver)).expect("Failed to open camera");
        camera.configure(&small_preview()).expect("Failed to configure camera");
        camera.start().expect("Failed to start camera");
        let clock = FrameClock::start(Arc::clone(&driver), TICK);
        (driver, camera, clock)
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(TICK);
        }
        condition()
    }

    #[test]
    fn test_blocking_capture_metadata() {
        let (_driver, camera, _clock) = running_camera();
        let _event_loop = EventLoop::start(&camera).unwrap();
        assert!(camera.is_asynchronous());

        let metadata = camera
            .capture_metadata(true, CompletionMode::default())
            .expect("metadata capture failed")
            .expect("blocking capture returns its outcome");
        assert!(metadata.contains(ids::FRAME_SEQUENCE));
        assert!(metadata.contains(ids::SENSOR_TIMESTAMP));
        assert!(camera.frames_delivered() >= 1);
    }

    #[test]
    fn test_stop_is_routed_through_the_loop() {
        let (driver, camera, _clock) = running_camera();
        let mut event_loop = EventLoop::start(&camera).unwrap();

        camera.stop().expect("stop through the event loop failed");
        assert!(!camera.is_started());
        assert!(!driver.is_running());
        assert_eq!(camera.generation(), 1);
        assert!(matches!(camera.poll_or_wait(false), Ok(OperationStatus::Complete(Ok(None)))));

        event_loop.stop();
        assert!(!event_loop.is_running());
        assert!(!camera.is_asynchronous());
        event_loop.stop();
    }

    #[test]
    fn test_only_one_loop_per_camera() {
        let (_driver, camera, _clock) = running_camera();
        let mut first = EventLoop::start(&camera).unwrap();
        assert!(matches!(EventLoop::start(&camera), Err(CameraError::EventLoopAlreadyRunning)));

        first.stop();
        let _second = EventLoop::start(&camera).expect("loop should restart after stop");
    }

    #[test]
    fn test_capture_request_from_a_running_session() {
        let (driver, camera, _clock) = running_camera();
        let _event_loop = EventLoop::start(&camera).unwrap();

        let frame = camera
            .capture_request(true, CompletionMode::default())
            .unwrap()
            .expect("session is running");
        assert_eq!(frame.generation(), camera.generation());
        assert!(frame.metadata().is_ok());
        let before = driver.resubmit_count();
        frame.release().unwrap();
        assert!(wait_until(Duration::from_secs(2), || driver.resubmit_count() > before));
    }

    #[test]
    fn test_consumer_receives_frames() {
        let (_driver, camera, _clock) = running_camera();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut event_loop = EventLoop::start_with(&camera, move |_: &Camera, frame: camreq::FrameHandle| {
            counter.fetch_add(1, Ordering::SeqCst);
            frame.release().unwrap();
        })
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || seen.load(Ordering::SeqCst) >= 3));
        event_loop.stop();
    }

    #[test]
    fn test_callback_runs_on_the_loop_thread() {
        let (_driver, camera, _clock) = running_camera();
        let _event_loop = EventLoop::start(&camera).unwrap();

        let (tx, rx) = mpsc::channel();
        let callback = CompletionMode::callback(move |result| {
            let name = thread::current().name().map(str::to_owned);
            tx.send((name, result.map(|o| o.and_then(Outcome::into_metadata).is_some())))
                .unwrap();
        });
        assert!(camera.dispatch(capture::metadata(), false, callback).unwrap().is_none());

        let (name, result) = rx.recv_timeout(Duration::from_secs(2)).expect("callback never ran");
        assert_eq!(name.as_deref(), Some("camreq-event-loop"));
        assert!(result.unwrap());
    }

    #[test]
    fn test_switch_mode_and_capture_image() {
        let (_driver, camera, _clock) = running_camera();
        let _event_loop = EventLoop::start(&camera).unwrap();
        let still = CameraConfiguration::new(vec![
            StreamConfig::new(StreamRole::Still)
                .with_format(PixelFormat::RGB888)
                .with_size(128, 96),
        ]);

        let image = camera
            .switch_mode_and_capture_image(&still, 0, true, CompletionMode::default())
            .unwrap()
            .unwrap();
        assert_eq!(image.dimensions(), (128, 96));
        assert_eq!(camera.configuration().unwrap().streams[0].role, StreamRole::Preview);
        assert_eq!(camera.generation(), 2);
    }

    #[test]
    fn test_stopping_the_loop_fails_the_pending_operation() {
        init_tracing();
        let driver = VirtualCamera::shared("virtual0");
        let camera = Camera::open(Arc::clone(&driver)).unwrap();
        camera.configure(&small_preview()).unwrap();
        camera.start().unwrap();
        // No frame clock: no frame will ever arrive.
        let mut event_loop = EventLoop::start(&camera).unwrap();

        let op = Operation::new("stuck").step("never", |_, _| Ok(true));
        camera.dispatch(op, false, CompletionMode::default()).unwrap();
        assert!(matches!(camera.poll_or_wait(false), Ok(OperationStatus::Pending)));

        event_loop.stop();
        assert!(matches!(
            camera.poll_or_wait(false),
            Ok(OperationStatus::Complete(Err(CameraError::EventLoopNotRunning)))
        ));
    }

    #[test]
    fn test_close_with_loop_running() {
        let (driver, camera, _clock) = running_camera();
        let mut event_loop = EventLoop::start(&camera).unwrap();
        camera.close().unwrap();
        assert!(!driver.is_running());
        event_loop.stop();
    }

    #[test]
    fn test_blocking_capture_after_stop_fails_at_once() {
        let (_driver, camera, _clock) = running_camera();
        let _event_loop = EventLoop::start(&camera).unwrap();
        camera.stop().unwrap();

        let (tx, rx) = mpsc::channel();
        let capturing = camera.clone();
        thread::spawn(move || {
            let metadata = capturing.capture_metadata(true, CompletionMode::default());
            let frame = capturing.capture_request(true, CompletionMode::default());
            tx.send((metadata, frame.map(|f| f.is_none()))).unwrap();
        });
        let (metadata, frame) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("capture on a stopped session blocked");
        assert!(matches!(metadata, Err(CameraError::NotStarted)));
        assert!(frame.unwrap());

        // Later operations are not locked out.
        camera.start().unwrap();
        let metadata = camera.capture_metadata(true, CompletionMode::default()).unwrap();
        assert!(metadata.is_some());
    }

    #[test]
    fn test_consumer_may_stop_its_own_loop() {
        let (_driver, camera, _clock) = running_camera();
        let slot: Arc<Mutex<Option<EventLoop>>> = Arc::new(Mutex::new(None));
        let owned = Arc::clone(&slot);
        let (tx, rx) = mpsc::channel();
        let event_loop = EventLoop::start_with(&camera, move |_: &Camera, frame: camreq::FrameHandle| {
            frame.release().unwrap();
            if let Some(mut event_loop) = owned.lock().unwrap().take() {
                event_loop.stop();
                tx.send(event_loop.is_running()).unwrap();
            }
        })
        .unwrap();
        *slot.lock().unwrap() = Some(event_loop);

        let still_running = rx.recv_timeout(Duration::from_secs(2)).expect("consumer never stopped the loop");
        assert!(!still_running);
        assert!(wait_until(Duration::from_secs(2), || !camera.is_asynchronous()));
        assert!(matches!(
            camera.capture_metadata(true, CompletionMode::default()),
            Err(CameraError::EventLoopNotRunning)
        ));
    }
}
