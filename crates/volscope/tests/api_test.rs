//! Control-surface tests that run without a GPU.

use volscope::*;

#[test]
fn test_scene_round_trip_through_frame_parameters() {
    let mut scene = SceneState::new(Options::default().with_step_count(300));
    let volume = VolumeDataset::constant(UVec3::new(10, 20, 30), 0)
        .unwrap()
        .with_intensity_range(-1024.0, 3071.0);
    scene.set_volume(VolumeSummary::from(&volume));
    scene.set_render_method(RenderMethod::Mip);
    scene.set_hu_window(-200.0, 400.0);
    scene.set_clip_preset(ClipPlanePreset::Axial, 0.0);
    scene.set_channel_count(3);

    let params = scene.frame_parameters(7);
    assert_eq!(params.method, RenderMethod::Mip.gpu_code());
    assert_eq!((params.window_min, params.window_max), (-200.0, 400.0));
    assert_eq!((params.data_min, params.data_max), (-1024.0, 3071.0));
    assert_eq!(params.dimensions, [10.0, 20.0, 30.0]);
    assert_eq!(params.step_count, 300);
    assert_eq!(params.clip_plane_count, 1);
    assert_eq!(params.channel_count, 3);
    assert_eq!(params.frame_index, 7);
}

#[test]
fn test_loading_volume_resets_window() {
    let mut scene = SceneState::default();
    scene.set_hu_window(0.0, 10.0);
    let volume = VolumeDataset::from_fn(UVec3::splat(4), |p| (p.x * 100.0) as i16).unwrap();
    scene.set_volume(VolumeSummary::from(&volume));
    assert_eq!(scene.hu_window(), volume.intensity_range());
}

#[test]
fn test_channel_errors() {
    let mut scene = SceneState::default();
    assert!(matches!(
        scene.set_channel_gain(MAX_CHANNELS, 1.0),
        Err(VolscopeError::ChannelOutOfRange(4))
    ));
    assert!(matches!(
        scene.set_channel_preset(0, "ct-heart"),
        Err(VolscopeError::PresetNotFound(_))
    ));
    assert!(matches!(
        scene.set_tone_curve_points(0, Vec::new()),
        Err(VolscopeError::EmptyControlPoints(_))
    ));
}

#[test]
fn test_missing_transfer_function_file_falls_back() {
    let mut scene = SceneState::default();
    let before = scene.revision();
    scene
        .load_channel_transfer_function(0, "/nonexistent/volscope/tf.json")
        .unwrap();
    assert!(scene.revision() > before);
    let tf = scene.channels().get(0).unwrap().transfer_function();
    assert_eq!(tf.alpha_points.len(), 2);
    assert_eq!(scene.channels().get(0).unwrap().preset_id(), None);
}

#[test]
fn test_transfer_function_file_round_trip() {
    let registry = PresetRegistry::new();
    let bone = registry.get("ct-bone").unwrap().clone();
    let path = std::env::temp_dir().join("volscope_api_test_bone.json");
    bone.save(&path).unwrap();

    let mut scene = SceneState::default();
    scene.load_channel_transfer_function(1, &path).unwrap();
    let loaded = scene.channels().get(1).unwrap().transfer_function();
    assert_eq!(loaded.name, "ct-bone");
    assert_eq!(loaded.colour_points.len(), bone.colour_points.len());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_custom_preset_registration() {
    let mut scene = SceneState::default();
    let mut tf = TransferFunction::pass_through(0.0, 255.0);
    tf.name = "ultrasound".to_string();
    scene.presets_mut().register(tf);
    scene.set_channel_preset(2, "ultrasound").unwrap();
    assert_eq!(scene.channels().get(2).unwrap().preset_id(), Some("ultrasound"));
}

#[test]
fn test_options_json_round_trip() {
    let options = Options::default()
        .with_jitter(0.25)
        .with_compositing(CompositingOrder::BackToFront)
        .with_histogram_bins(1024);
    let json = options.to_json().unwrap();
    let parsed = Options::from_json(&json).unwrap();
    assert_eq!(parsed.jitter, 0.25);
    assert_eq!(parsed.compositing, CompositingOrder::BackToFront);
    assert_eq!(parsed.histogram_bins, 1024);
}

mod properties {
    use proptest::prelude::*;
    use volscope::{SceneState, Vec3, MAX_CHANNELS};

    proptest! {
        #[test]
        fn frame_parameters_are_sanitized(
            a in prop::array::uniform3(-1.0f32..2.0),
            b in prop::array::uniform3(-1.0f32..2.0),
            channels in 0usize..8,
            jitter in -2.0f32..2.0,
        ) {
            let mut scene = SceneState::default();
            let before = scene.revision();
            scene.set_clip_box(Vec3::from_array(a), Vec3::from_array(b));
            scene.set_channel_count(channels);
            scene.set_jitter(jitter);
            prop_assert!(scene.revision() > before);

            let params = scene.frame_parameters(0);
            for axis in 0..3 {
                prop_assert!(params.trim_min[axis] <= params.trim_max[axis]);
                prop_assert!((0.0..=1.0).contains(&params.trim_min[axis]));
                prop_assert!((0.0..=1.0).contains(&params.trim_max[axis]));
            }
            prop_assert!((1..=MAX_CHANNELS as i32).contains(&params.channel_count));
            prop_assert!((0.0..=1.0).contains(&params.jitter));
        }
    }
}
