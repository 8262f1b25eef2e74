use std::io::Write;
use std::time::Duration;

use camera_render::config::Configuration;
use camera_render::params::{ParamSlot, ev_to_normalized, shutter_to_normalized};

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn parse_full_kebab_case_config() {
    let file = write_config(
        r#"
render:
  frame-interval: 33ms
  initial-width: 640
  initial-height: 360
  clear-color: [16, 32, 48]
parallax:
  sensitivity: 0.01
  max-offset: 0.04
  dead-zone: 0.001
curves:
  composite: [[0.0, 0.2], [1.0, 0.8]]
  red: [[0.0, 0.0], [0.5, 0.6], [1.0, 1.0]]
presets:
  night:
    iso-speed: 3200
    shutter-seconds: 0.125
    exposure-ev: 1.5
    grain: 0.4
active-preset: night
synthetic:
  camera-fps: 24
  gyro-amplitude: 0.3
"#,
    );
    let cfg = Configuration::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();

    assert_eq!(cfg.render.frame_interval, Duration::from_millis(33));
    assert_eq!((cfg.render.initial_width, cfg.render.initial_height), (640, 360));
    assert_eq!(cfg.render.clear_color, [16, 32, 48]);
    assert_eq!(cfg.parallax.max_offset, 0.04);
    assert_eq!(cfg.synthetic.camera_fps, 24);
    assert_eq!(cfg.synthetic.frame_width, 640);

    let lut = cfg.curves.generate();
    assert_eq!(lut.entry(0), [61, 51, 51]);
    assert_eq!(lut.entry(255), [214, 204, 204]);

    let params = cfg.initial_parameters(None).unwrap();
    assert_eq!(params.get(ParamSlot::Shutter), shutter_to_normalized(0.125));
    assert_eq!(params.get(ParamSlot::Exposure), ev_to_normalized(1.5));
    assert_eq!(params.get(ParamSlot::Grain), 0.4);

    let thread = cfg.render.thread_config().unwrap();
    assert_eq!(thread.viewport, (640, 360));
    assert_eq!(thread.frame_interval, Duration::from_millis(33));
}

#[test]
fn command_line_preset_overrides_active_preset() {
    let file = write_config(
        r#"
presets:
  a:
    vignette: 0.5
  b:
    vignette: 0.25
active-preset: a
"#,
    );
    let cfg = Configuration::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.initial_parameters(None).unwrap().get(ParamSlot::Vignette), 0.5);
    assert_eq!(cfg.initial_parameters(Some("b")).unwrap().get(ParamSlot::Vignette), 0.25);
    assert!(cfg.initial_parameters(Some("missing")).is_err());
}

#[test]
fn shader_override_is_read_from_disk() {
    let mut shader = tempfile::NamedTempFile::new().unwrap();
    shader.write_all(b"// custom fragment").unwrap();
    let file = write_config(&format!(
        "render:\n  fragment-shader: {}\n",
        shader.path().display()
    ));
    let cfg = Configuration::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();
    let sources = cfg.render.shader_sources().unwrap();
    assert_eq!(sources.fragment, "// custom fragment");
    assert!(sources.vertex.contains("vs_main"));
}

#[test]
fn missing_shader_file_is_an_error() {
    let file = write_config("render:\n  vertex-shader: /definitely/not/here.wgsl\n");
    let cfg = Configuration::from_yaml_file(file.path()).unwrap();
    assert!(cfg.render.shader_sources().is_err());
}

#[test]
fn invalid_values_fail_validation() {
    for yaml in [
        "render:\n  initial-width: 0\n",
        "render:\n  frame-interval: 0s\n",
        "synthetic:\n  camera-fps: 0\n",
        "parallax:\n  dead-zone: 0.2\n",
        "presets:\n  bad:\n    warp-speed: 9\n",
    ] {
        let file = write_config(yaml);
        let cfg = Configuration::from_yaml_file(file.path()).unwrap();
        assert!(cfg.validated().is_err(), "accepted: {yaml}");
    }
}

#[test]
fn missing_file_reports_path() {
    let err = Configuration::from_yaml_file("/no/such/camera.yaml").unwrap_err();
    assert!(format!("{err:#}").contains("/no/such/camera.yaml"));
}
