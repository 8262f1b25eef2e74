use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camera_render::gpu::{GpuBackend, HeadlessBackend, HeadlessProbe};
use camera_render::tasks::render_thread;
use camera_render::tasks::synthetic::gradient_frame;
use camera_render::{
    BackendFactory, ParameterVector, RenderError, RenderInputs, RenderThreadConfig,
    RenderThreadHandle, SurfaceReady,
};

fn start(inputs: RenderInputs) -> (RenderThreadHandle, HeadlessProbe) {
    let (backend, probe) = HeadlessBackend::new();
    let factory: BackendFactory = Box::new(move || Ok(Box::new(backend) as Box<dyn GpuBackend>));
    let config = RenderThreadConfig {
        frame_interval: Duration::from_millis(2),
        viewport: (8, 8),
        ..RenderThreadConfig::default()
    };
    let handle = render_thread::spawn(config, inputs, SurfaceReady::new(42), factory).unwrap();
    (handle, probe)
}

fn eventually(what: &str, pred: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn producers_on_other_threads_feed_the_render_thread() {
    let (handle, probe) = start(RenderInputs::default());
    let sink = handle.frame_sink();
    let inputs = handle.inputs().clone();

    let camera = thread::spawn(move || {
        for i in 0..20 {
            let frame = gradient_frame(8, 8, i as f32 / 20.0, Duration::from_millis(i)).unwrap();
            sink.deliver(frame).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });
    let ui = thread::spawn(move || {
        let mut params = ParameterVector::neutral();
        params.set_saturation(-1.0);
        inputs.publish_parameters(params);
    });
    camera.join().unwrap();
    ui.join().unwrap();

    eventually("a desaturated frame", || {
        probe
            .framebuffer()
            .is_some_and(|fb| fb.pixels.chunks_exact(4).all(|p| p[0] == p[1] && p[1] == p[2]))
    });
    let stats = handle.shutdown().unwrap();
    assert!(stats.drawn > 0);
    assert!(stats.fresh > 0);
    assert!(stats.fresh <= 20);
}

#[test]
fn concurrent_shutdown_releases_exactly_once() {
    let (handle, probe) = start(RenderInputs::default());
    eventually("first frame", || handle.stats().drawn > 0);

    let handle = Arc::new(handle);
    let callers: Vec<_> = (0..4)
        .map(|_| {
            let handle = Arc::clone(&handle);
            thread::spawn(move || handle.shutdown())
        })
        .collect();
    let results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(RenderError::Released)))
            .count(),
        3
    );
    assert_eq!(probe.live_programs(), 0);
    assert_eq!(probe.live_textures(), 0);
}

#[test]
fn dropping_the_handle_releases_gpu_resources() {
    let (handle, probe) = start(RenderInputs::default());
    let sink = handle.frame_sink();
    eventually("first frame", || handle.stats().drawn > 0);
    drop(handle);

    assert_eq!(probe.live_programs(), 0);
    assert_eq!(probe.live_textures(), 0);
    let frame = gradient_frame(8, 8, 0.0, Duration::ZERO).unwrap();
    assert!(matches!(sink.deliver(frame), Err(RenderError::Released)));
}
