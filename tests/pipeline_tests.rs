use std::time::Duration;

use camera_render::gpu::{GpuCommand, HeadlessBackend, HeadlessProbe, RenderContext, ShaderStage};
use camera_render::tasks::synthetic::gradient_frame;
use camera_render::{
    CurveControlPoints, CurveSet, FrameOutcome, FrameToken, ParamSlot, ParallaxConfig,
    ParallaxIntegrator, ParameterVector, RawDeviceUnits, RenderError, RenderInputs, RenderState,
    Renderer, ShaderError, ShaderSources, SurfaceReady,
};

const W: u32 = 24;
const H: u32 = 16;

fn renderer(inputs: RenderInputs, sources: ShaderSources) -> (Renderer, HeadlessProbe) {
    let (backend, probe) = HeadlessBackend::new();
    let ctx = RenderContext::new(Box::new(backend));
    (Renderer::new(ctx, inputs, sources, (W, H)), probe)
}

#[test]
fn neutral_parameters_and_identity_curve_leave_frame_unchanged() {
    let inputs = RenderInputs::new(ParameterVector::neutral(), CurveSet::identity().generate());
    let (mut r, probe) = renderer(inputs, ShaderSources::default());
    let sink = r.initialize(SurfaceReady::new(7)).unwrap();
    let frame = gradient_frame(W, H, 0.3, Duration::ZERO).unwrap();
    sink.deliver(frame.clone()).unwrap();

    let report = r.render_frame().unwrap();
    assert_eq!(report.outcome, FrameOutcome::Drawn);
    assert_eq!(report.frame, FrameToken::Fresh { sequence: 1 });
    let fb = probe.framebuffer().unwrap();
    assert_eq!((fb.width, fb.height), (W, H));
    assert_eq!(fb.pixels, frame.pixels());
}

#[test]
fn inverted_curve_inverts_color_channels() {
    let curves = CurveSet {
        composite: CurveControlPoints::new([(0.0, 1.0), (1.0, 0.0)]),
        ..CurveSet::identity()
    };
    let inputs = RenderInputs::new(ParameterVector::neutral(), curves.generate());
    let (mut r, probe) = renderer(inputs, ShaderSources::default());
    let sink = r.initialize(SurfaceReady::new(1)).unwrap();
    let frame = gradient_frame(W, H, 0.0, Duration::ZERO).unwrap();
    sink.deliver(frame.clone()).unwrap();
    r.render_frame().unwrap();

    let fb = probe.framebuffer().unwrap();
    for (out, src) in fb.pixels.chunks_exact(4).zip(frame.pixels().chunks_exact(4)) {
        assert_eq!(out[0], 255 - src[0]);
        assert_eq!(out[1], 255 - src[1]);
        assert_eq!(out[2], 255 - src[2]);
        assert_eq!(out[3], src[3]);
    }
}

#[test]
fn three_publications_before_a_frame_upload_only_the_last() {
    let inputs = RenderInputs::default();
    let (mut r, probe) = renderer(inputs.clone(), ShaderSources::default());
    r.initialize(SurfaceReady::new(1)).unwrap();

    let publishers: Vec<_> = (1..=3)
        .map(|i| {
            let mut params = ParameterVector::neutral();
            params.set_vignette(i as f32 * 0.2);
            params
        })
        .collect();
    for params in &publishers {
        inputs.publish_parameters(*params);
    }
    probe.take_commands();
    let report = r.render_frame().unwrap();
    assert_eq!(report.params_generation, 3);

    let uploaded: Vec<_> = probe
        .take_commands()
        .into_iter()
        .filter_map(|cmd| match cmd {
            GpuCommand::UploadParameters(block) => Some(block),
            _ => None,
        })
        .collect();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0], publishers[2].to_uniform_block());
    assert_eq!(
        uploaded[0][ParamSlot::Vignette.index()],
        publishers[2].get(ParamSlot::Vignette)
    );
}

#[test]
fn fragment_syntax_error_reports_stage_and_blocks_ready() {
    let sources = ShaderSources {
        fragment: "@fragment\nfn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0 }".into(),
        ..ShaderSources::default()
    };
    let (mut r, probe) = renderer(RenderInputs::default(), sources);
    match r.initialize(SurfaceReady::new(1)) {
        Err(RenderError::Shader(ShaderError::Compile { stage, diagnostic })) => {
            assert_eq!(stage, ShaderStage::Fragment);
            assert!(!diagnostic.is_empty());
        }
        other => panic!("expected fragment compile error, got {other:?}"),
    }
    assert_eq!(r.state(), RenderState::Uninitialized);
    assert_eq!(probe.live_programs(), 0);
    assert_eq!(probe.live_textures(), 0);
}

#[test]
fn released_pipeline_rejects_every_operation() {
    let (mut r, probe) = renderer(RenderInputs::default(), ShaderSources::default());
    let sink = r.initialize(SurfaceReady::new(1)).unwrap();
    r.render_frame().unwrap();
    r.release().unwrap();

    assert_eq!(probe.live_programs(), 0);
    assert_eq!(probe.live_textures(), 0);
    assert!(matches!(r.render_frame(), Err(RenderError::Released)));
    assert!(matches!(r.resize(2, 2), Err(RenderError::Released)));
    assert!(matches!(r.release(), Err(RenderError::Released)));
    let frame = gradient_frame(W, H, 0.0, Duration::ZERO).unwrap();
    assert!(matches!(sink.deliver(frame), Err(RenderError::Released)));
}

#[test]
fn out_of_range_device_units_clamp_to_domain() {
    let params = ParameterVector::from_raw_device_units(&RawDeviceUnits {
        iso_speed: Some(999_999.0),
        kelvin: Some(-5.0),
        exposure_ev: Some(f32::INFINITY),
        shutter_seconds: None,
    });
    let array = params.to_uniform_array();
    assert_eq!(array.len(), 28);
    assert_eq!(array[ParamSlot::Iso.index()], 1.0);
    assert_eq!(array[ParamSlot::Temperature.index()], 0.0);
    assert!(array.iter().all(|v| v.is_finite()));
}

#[test]
fn parallax_dead_zone_and_saturation() {
    let config = ParallaxConfig::default();
    let integrator = ParallaxIntegrator::new(config).unwrap();
    let quiet = config.velocity_dead_zone() * 0.5;
    let offset = integrator.update(quiet, -quiet);
    assert_eq!((offset.dx, offset.dy), (0.0, 0.0));

    let loud = config.velocity_saturation() * 3.0;
    let offset = integrator.update(loud, -loud);
    assert_eq!((offset.dx, offset.dy), (config.max_offset, -config.max_offset));
}
