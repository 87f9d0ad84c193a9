/// Operation dispatch and step scheduling, with drains run by hand on the test thread.
#[cfg(test)]
mod dispatch_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    use camreq::driver::VirtualCamera;
    use camreq::{
        capture, Camera, CameraConfiguration, CameraError, CompletionMode, ControlList, Operation, OperationResult,
        OperationStatus, Outcome, Release, StreamConfig, StreamRole,
    };

    fn started_camera() -> (Arc<VirtualCamera>, Camera) {
        let driver = VirtualCamera::shared("virtual0");
        let camera = Camera::open(Arc::clone(&driver)).expect("Failed to open camera");
        let layout = CameraConfiguration::new(vec![StreamConfig::new(StreamRole::Preview).with_size(64, 48)]);
        camera.configure(&layout).expect("Failed to configure camera");
        camera.start().expect("Failed to start camera");
        (driver, camera)
    }

    /// Complete one request and drain it, releasing whatever frame comes back.
    fn drain_one(driver: &VirtualCamera, camera: &Camera) {
        assert!(driver.complete_next(), "driver had nothing queued");
        if let Some(frame) = camera.process_requests().unwrap() {
            frame.release().unwrap();
        }
    }

    fn completed(camera: &Camera) -> OperationResult {
        match camera.poll_or_wait(false).unwrap() {
            OperationStatus::Complete(result) => result,
            OperationStatus::Pending => panic!("operation still pending"),
        }
    }

    #[test]
    fn test_poll_without_operation() {
        let (_driver, camera) = started_camera();
        assert!(matches!(camera.poll_or_wait(false), Err(CameraError::NoOperation)));
        assert!(matches!(camera.poll_or_wait(true), Err(CameraError::NoOperation)));
    }

    #[test]
    fn test_second_dispatch_is_rejected() {
        let (driver, camera) = started_camera();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let first = Operation::new("first").step("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        });
        assert!(camera.dispatch(first, false, CompletionMode::default()).unwrap().is_none());

        let second = Operation::new("second").step("never", |_, _| Ok(true));
        assert!(matches!(
            camera.dispatch(second, false, CompletionMode::default()),
            Err(CameraError::ConcurrentOperation)
        ));

        drain_one(&driver, &camera);
        drain_one(&driver, &camera);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(camera.poll_or_wait(false), Ok(OperationStatus::Pending)));
    }

    #[test]
    fn test_step_runs_again_until_done() {
        let (driver, camera) = started_camera();
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&a_calls), Arc::clone(&b_calls));
        let op = Operation::new("two_steps")
            .step("a", move |_, _| Ok(a.fetch_add(1, Ordering::SeqCst) == 1))
            .step("b", move |_, _| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();

        drain_one(&driver, &camera);
        assert_eq!((a_calls.load(Ordering::SeqCst), b_calls.load(Ordering::SeqCst)), (1, 0));
        drain_one(&driver, &camera);
        assert_eq!((a_calls.load(Ordering::SeqCst), b_calls.load(Ordering::SeqCst)), (2, 0));
        assert!(matches!(camera.poll_or_wait(false), Ok(OperationStatus::Pending)));
        drain_one(&driver, &camera);
        assert_eq!((a_calls.load(Ordering::SeqCst), b_calls.load(Ordering::SeqCst)), (2, 1));

        assert!(matches!(completed(&camera), Ok(None)));
        // Collecting again changes nothing.
        assert!(matches!(completed(&camera), Ok(None)));
        drain_one(&driver, &camera);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_newest_frame_reaches_the_step() {
        let (driver, camera) = started_camera();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let op = Operation::new("record").step("record", move |_, frame| {
            record.lock().unwrap().push(frame.sequence());
            Ok(true)
        });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();

        assert_eq!(driver.complete_frames(2), 2);
        let newest = camera.process_requests().unwrap().expect("newest frame");
        assert_eq!(newest.sequence(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert_eq!(camera.frames_delivered(), 2);
        // The older frame was recycled during the drain.
        assert_eq!(driver.resubmit_count(), 5);

        assert_eq!(newest.release().unwrap(), Release::Recycled);
        assert!(matches!(completed(&camera), Ok(None)));
    }

    #[test]
    fn test_step_error_abandons_the_operation() {
        let (driver, camera) = started_camera();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        let op = Operation::new("failing")
            .step("fail", |_, _| Err(CameraError::InvalidConfiguration("boom".into())))
            .step("after", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();
        drain_one(&driver, &camera);

        match completed(&camera) {
            Err(CameraError::StepExecution { step, source }) => {
                assert_eq!(step, "fail");
                assert!(matches!(*source, CameraError::InvalidConfiguration(_)));
            }
            other => panic!("expected a step failure, got {other:?}"),
        }
        drain_one(&driver, &camera);
        assert_eq!(later.load(Ordering::SeqCst), 0);

        // The engine keeps serving new operations.
        camera.dispatch(capture::metadata(), false, CompletionMode::default()).unwrap();
        drain_one(&driver, &camera);
        assert!(matches!(completed(&camera), Ok(Some(Outcome::Metadata(_)))));
    }

    #[test]
    fn test_step_panic_is_reported() {
        let (driver, camera) = started_camera();
        let op = Operation::new("panicking").step("explode", |_, _| -> camreq::Result<bool> { panic!("kaboom") });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();
        drain_one(&driver, &camera);

        let error = completed(&camera).unwrap_err();
        match error.root_cause() {
            CameraError::StepPanicked(message) => assert!(message.contains("kaboom")),
            other => panic!("expected a panic report, got {other:?}"),
        }
        assert!(camera.is_started());
    }

    #[test]
    fn test_callback_may_dispatch_the_next_operation() {
        let (driver, camera) = started_camera();
        let (tx, rx) = mpsc::channel();
        let chained = camera.clone();
        let callback = CompletionMode::callback(move |result| {
            let follow_up = chained.dispatch(capture::metadata(), false, CompletionMode::default());
            tx.send((result.is_ok(), follow_up.is_ok())).unwrap();
        });
        let first = Operation::new("first").step("done", |_, _| Ok(true));
        camera.dispatch(first, false, callback).unwrap();

        drain_one(&driver, &camera);
        assert_eq!(rx.try_recv().unwrap(), (true, true));

        drain_one(&driver, &camera);
        assert!(matches!(completed(&camera), Ok(Some(Outcome::Metadata(_)))));
    }

    #[test]
    fn test_restart_inside_an_operation() {
        let (driver, camera) = started_camera();
        let observed = Arc::new(Mutex::new(None));
        let record = Arc::clone(&observed);
        let op = Operation::new("restart_then_grab")
            .step("restart", |ctx, _| {
                ctx.session().stop()?;
                ctx.session().start(&ControlList::new())?;
                Ok(true)
            })
            .step("grab", move |ctx, frame| {
                *record.lock().unwrap() = Some((frame.generation(), ctx.session_ref().generation()));
                frame.acquire()?;
                ctx.set_outcome(Outcome::Frame(frame.clone()));
                Ok(true)
            });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();

        driver.complete_next();
        // The frame the restart step ran against is from the old session.
        assert!(camera.process_requests().unwrap().is_none());
        assert_eq!(camera.generation(), 1);
        assert_eq!(driver.queued_len(), 4);

        drain_one(&driver, &camera);
        assert_eq!(*observed.lock().unwrap(), Some((1, 1)));
        let frame = match completed(&camera) {
            Ok(Some(Outcome::Frame(frame))) => frame,
            other => panic!("expected a frame, got {other:?}"),
        };
        assert_eq!(frame.generation(), 1);
        assert_eq!(frame.release().unwrap(), Release::Recycled);
    }

    #[test]
    fn test_blocking_dispatch_needs_an_event_loop() {
        let (_driver, camera) = started_camera();
        assert!(matches!(
            camera.dispatch(capture::metadata(), true, CompletionMode::default()),
            Err(CameraError::EventLoopNotRunning)
        ));
        assert!(matches!(camera.poll_or_wait(false), Err(CameraError::NoOperation)));
        assert!(matches!(
            camera.capture_metadata(true, CompletionMode::default()),
            Err(CameraError::EventLoopNotRunning)
        ));

        camera.dispatch(capture::metadata(), false, CompletionMode::default()).unwrap();
        assert!(matches!(camera.poll_or_wait(true), Err(CameraError::EventLoopNotRunning)));
    }

    #[test]
    fn test_capture_request_hands_over_a_reference() {
        let (driver, camera) = started_camera();
        camera.dispatch(capture::request(), false, CompletionMode::default()).unwrap();
        driver.complete_next();
        let loop_ref = camera.process_requests().unwrap().unwrap();
        let frame = completed(&camera).unwrap().and_then(Outcome::into_frame).unwrap();
        assert!(frame.same_frame(&loop_ref));
        assert_eq!(frame.ref_count(), 2);

        assert_eq!(loop_ref.release().unwrap(), Release::Retained(1));
        assert_eq!(frame.release().unwrap(), Release::Recycled);
    }

    #[test]
    fn test_non_blocking_capture_through_the_facade() {
        let (driver, camera) = started_camera();
        assert!(camera.capture_metadata(false, CompletionMode::default()).unwrap().is_none());
        assert!(matches!(camera.poll_or_wait(false), Ok(OperationStatus::Pending)));

        drain_one(&driver, &camera);
        assert!(matches!(completed(&camera), Ok(Some(Outcome::Metadata(_)))));

        let (tx, rx) = mpsc::channel();
        let callback = CompletionMode::callback(move |result| {
            tx.send(result.map(|o| o.and_then(Outcome::into_buffer).map(|b| b.len()))).unwrap();
        });
        assert!(camera.capture_buffer(0, false, callback).unwrap().is_none());
        drain_one(&driver, &camera);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Some(64 * 4 * 48));
    }

    #[test]
    fn test_capture_on_a_stopped_session() {
        let (_driver, camera) = started_camera();
        camera.stop().unwrap();

        assert!(matches!(
            camera.dispatch(capture::metadata(), false, CompletionMode::default()),
            Err(CameraError::NotStarted)
        ));
        assert!(matches!(
            camera.capture_image(0, false, CompletionMode::default()),
            Err(CameraError::NotStarted)
        ));
        assert!(camera.capture_request(false, CompletionMode::default()).unwrap().is_none());
        assert!(camera.acquire_latest_frame(false, CompletionMode::default()).unwrap().is_none());
        // Nothing was left in flight.
        assert!(matches!(camera.poll_or_wait(false), Err(CameraError::NoOperation)));
        assert!(camera.dispatch(Operation::new("noop"), false, CompletionMode::default()).is_ok());
    }

    #[test]
    fn test_stop_fails_the_pending_operation() {
        let (driver, camera) = started_camera();
        camera.dispatch(capture::metadata(), false, CompletionMode::default()).unwrap();
        camera.stop().unwrap();
        assert!(matches!(completed(&camera), Err(CameraError::NotStarted)));

        camera.start().unwrap();
        camera.dispatch(capture::metadata(), false, CompletionMode::default()).unwrap();
        drain_one(&driver, &camera);
        assert!(matches!(completed(&camera), Ok(Some(Outcome::Metadata(_)))));
    }

    #[test]
    fn test_step_that_stops_the_session_ends_the_operation() {
        let (driver, camera) = started_camera();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        let op = Operation::new("stop_then_grab")
            .step("stop", |ctx, _| {
                ctx.session().stop()?;
                Ok(true)
            })
            .step("grab", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });
        camera.dispatch(op, false, CompletionMode::default()).unwrap();

        driver.complete_next();
        assert!(camera.process_requests().unwrap().is_none());
        assert!(!camera.is_started());
        assert!(matches!(completed(&camera), Err(CameraError::NotStarted)));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }
}
