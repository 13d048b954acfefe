//! Renders a synthetic CT phantom with several methods and saves PNGs.
//!
//! Run with: `cargo run --example render_phantom -- [output_dir]`

use volscope::*;

/// Water-filled cylinder with a bone ring and an air pocket, in HU.
fn phantom(size: u32) -> Result<VolumeDataset> {
    let volume = VolumeDataset::from_fn(UVec3::splat(size), |p| {
        let radial = Vec2::new(p.x - 0.5, p.y - 0.5).length();
        let pocket = p.distance(Vec3::new(0.62, 0.45, 0.5));
        if radial > 0.42 {
            -1000
        } else if radial > 0.36 {
            900
        } else if pocket < 0.08 {
            -800
        } else {
            40
        }
    })?;
    Ok(volume
        .with_spacing(Vec3::new(0.8, 0.8, 1.25))
        .with_intensity_range(-1024.0, 3071.0))
}

fn main() -> Result<()> {
    init_logging();
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let out = |name: &str| std::path::Path::new(&out_dir).join(name);

    let volume = phantom(96)?;
    let renderer = VolumeRenderer::new_headless(Options::default().with_lighting(true))?;
    println!("adapter: {}", renderer.adapter_name());
    renderer.load_volume(&volume)?;
    renderer.warm_up(512, 512)?;

    let camera = FrameCamera::orbit(
        volume.physical_extent(),
        Vec3::new(1.6, -1.2, 1.4),
        0.7,
        1.0,
    );

    renderer.set_channel_preset(0, "ct-bone")?;
    render(&renderer, &camera, out("phantom_dvr_bone.png"))?;

    renderer.set_clip_preset(ClipPlanePreset::Sagittal, 0.0);
    renderer.set_channel_preset(0, "ct-soft-tissue")?;
    render(&renderer, &camera, out("phantom_dvr_clipped.png"))?;
    renderer.update(SceneState::reset_clip);

    renderer.set_render_method(RenderMethod::Mip);
    render(&renderer, &camera, out("phantom_mip.png"))?;

    let histograms = renderer.compute_histogram(None)?;
    let peak = histograms[0]
        .bins
        .iter()
        .enumerate()
        .max_by_key(|&(_, count)| *count)
        .map_or(0, |(bin, _)| bin);
    println!("histogram peak at bin {peak} of {}", histograms[0].bins.len());
    renderer.apply_auto_window(0, AutoWindowPreset::default())?;

    renderer.set_render_method(RenderMethod::Mpr);
    renderer.set_hu_window(-160.0, 240.0);
    renderer.set_mpr_slab(0.05, 12, MprBlend::Mean);
    render(&renderer, &camera, out("phantom_mpr_slab.png"))?;

    Ok(())
}

fn render(renderer: &VolumeRenderer, camera: &FrameCamera, path: std::path::PathBuf) -> Result<()> {
    match renderer.render_frame(camera, 512, 512) {
        FrameOutcome::Rendered(timings) => {
            println!(
                "{}: {:.2} ms",
                path.display(),
                timings.best().as_secs_f64() * 1e3
            );
            renderer.save_frame(&path)
        }
        FrameOutcome::Skipped(reason) => {
            println!("{}: skipped ({reason:?})", path.display());
            Ok(())
        }
    }
}
