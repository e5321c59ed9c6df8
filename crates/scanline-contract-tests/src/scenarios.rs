//! End-to-end sessions driven through `Pipeline` on the headless backend.

use scanline_core::{EngineError, Size, VideoSettings, Viewport};
use scanline_runtime::{Collaborators, Frame, FrameOutcome, HwRenderRequest, Pipeline};
use scanline_runtime_headless::HeadlessBackend;

use crate::support::*;

const FULL_HD: Size = Size::new(1920, 1080);

/// A two-pass preset at 1920x1080: half-size intermediate, final pass straight to the
/// backbuffer with no composite.
#[test]
fn two_pass_preset_sizes_intermediate_and_targets_backbuffer() {
    init_tracing();
    let mut pipe = headless_pipeline(
        VideoSettings {
            shader_preset: Some(write_two_pass_preset("scenario_a")),
            ..VideoSettings::default()
        },
        FULL_HD,
    );
    assert!(!pipe.chain().is_stock());
    assert_eq!(pipe.chain().pass_count(), 2);

    let size = Size::new(320, 240);
    let px = solid_pixels(size, 0x40);
    let out = pipe
        .frame(Frame::Pixels(rgba(size, &px)), &[])
        .expect("frame");
    assert_eq!(out, FrameOutcome::Presented);

    assert_eq!(pipe.chain().pass_output_size(0), Some(Size::new(960, 540)));
    assert_eq!(pipe.chain().pass_targets_backbuffer(0), Some(false));
    assert_eq!(pipe.chain().pass_targets_backbuffer(1), Some(true));
    assert_eq!(pipe.chain().pass_output_size(1), Some(FULL_HD));

    let draws = pipe.backend().draws();
    assert_eq!(draws.len(), 2, "one draw per pass, no composite");
    assert!(!draws[0].targets_backbuffer());
    assert!(draws[1].targets_backbuffer());
    assert_eq!(
        draws[1].input("Source").map(|i| i.marker),
        Some(draws[0].marker),
        "pass 1 samples what pass 0 wrote"
    );
    assert_eq!(pipe.backend().presents().len(), 1);
}

/// A core asking for 4096x4096 on a 2048 device gets a clamped target and a warning,
/// not a failure.
#[test]
fn oversized_hw_render_request_is_clamped_with_warning() {
    let mut gpu = HeadlessBackend::new();
    gpu.caps_mut().max_texture_size = 2048;
    let mut pipe = Pipeline::new(
        gpu,
        VideoSettings::default(),
        Size::new(640, 480),
        Collaborators::default(),
    )
    .expect("pipeline");

    let request = HwRenderRequest {
        max_width: 4096,
        max_height: 4096,
        depth: false,
        stencil: false,
    };
    let (granted, logs) = capture_warnings(|| pipe.enable_hw_render(request));
    assert_eq!(granted.expect("clamped enable"), Size::new(2048, 2048));
    assert!(logs.contains("WARN"), "logs: {logs}");
    assert!(logs.contains("clamped"), "logs: {logs}");

    let iface = pipe.hw_interface().expect("interface");
    assert_eq!(iface.max_size, Size::new(2048, 2048));
    assert!(pipe.session().hw_render_enabled);

    // The core then reports a full-size frame; it is sampled at the clamped size.
    pipe.bind_hw_for_core().expect("core binds");
    pipe.bind_hw_for_frontend();
    let out = pipe
        .frame(Frame::Hardware { size: Size::new(4096, 4096) }, &[])
        .expect("frame");
    assert_eq!(out, FrameOutcome::Presented);
    let last = pipe.backend().draws().last().expect("draw");
    assert!(last.targets_backbuffer());
    let source = last.input("Source").expect("Source bound");
    assert_eq!(
        pipe.backend().texture_size(source.texture),
        Some(Size::new(2048, 2048))
    );
}

/// A core drawing a small frame into a large hardware target only exposes the valid
/// rect to the chain.
#[test]
fn small_hw_frame_in_large_target_is_sampled_at_frame_size() {
    let mut pipe = headless_pipeline(VideoSettings::default(), Size::new(640, 480));
    pipe.enable_hw_render(HwRenderRequest {
        max_width: 2048,
        max_height: 2048,
        depth: false,
        stencil: false,
    })
    .expect("enable");
    let iface = pipe.hw_interface().expect("interface");

    let out = pipe
        .frame(Frame::Hardware { size: Size::new(640, 480) }, &[])
        .expect("frame");
    assert_eq!(out, FrameOutcome::Presented);
    let last = pipe.backend().draws().last().expect("draw");
    let source = last.input("Source").expect("Source bound");
    assert_ne!(source.texture, iface.target);
    assert_eq!(
        pipe.backend().texture_size(source.texture),
        Some(Size::new(640, 480))
    );
}

/// Toggling vsync mid-session under hard sync drains fences and reapplies the swap
/// interval without touching the chain.
#[test]
fn vsync_toggle_drains_fences_and_keeps_chain() {
    let mut pipe = headless_pipeline(
        VideoSettings {
            shader_preset: Some(write_two_pass_preset("scenario_c")),
            hard_sync: true,
            hard_sync_frames: 1,
            ..VideoSettings::default()
        },
        Size::new(640, 480),
    );
    let size = Size::new(160, 120);
    let px = solid_pixels(size, 0x11);
    for _ in 0..3 {
        pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    }
    assert_eq!(pipe.scheduler().outstanding_fences(), 1);
    let stats = pipe.chain().pool_stats();
    let passes = pipe.chain().pass_count();

    pipe.set_vsync(false).expect("vsync off");
    assert_eq!(pipe.scheduler().outstanding_fences(), 0);
    assert_eq!(pipe.backend().swap_interval(), 0);
    assert!(!pipe.session().resize_chain_pending);

    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    assert_eq!(pipe.backend().presents().last().map(|p| p.swap_interval), Some(0));

    pipe.set_vsync(true).expect("vsync on");
    assert_eq!(pipe.scheduler().outstanding_fences(), 0);
    assert_eq!(pipe.backend().swap_interval(), 1);
    assert!(!pipe.session().resize_chain_pending);

    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    assert_eq!(pipe.chain().pool_stats(), stats, "no render target was recreated");
    assert_eq!(pipe.chain().pass_count(), passes);
    assert!(!pipe.chain().is_stock());
}

#[test]
fn disabling_hard_sync_mid_session_drains_fences() {
    let mut pipe = headless_pipeline(
        VideoSettings {
            hard_sync: true,
            hard_sync_frames: 3,
            ..VideoSettings::default()
        },
        Size::new(320, 240),
    );
    let size = Size::new(16, 16);
    let px = solid_pixels(size, 0x33);
    for _ in 0..5 {
        pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    }
    assert_eq!(pipe.scheduler().outstanding_fences(), 3);

    pipe.set_hard_sync(true, 1).expect("tighten");
    assert_eq!(pipe.scheduler().outstanding_fences(), 1);

    pipe.set_hard_sync(false, 1).expect("hard sync off");
    assert_eq!(pipe.scheduler().outstanding_fences(), 0);
    assert_eq!(pipe.backend().live_fence_count(), 0);
    assert!(!pipe.settings().hard_sync);

    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    assert_eq!(pipe.scheduler().outstanding_fences(), 0);

    let err = pipe.set_hard_sync(true, 9).expect_err("bound past 3");
    assert!(!err.is_fatal());
    assert!(!pipe.settings().hard_sync, "rejected settings are not applied");
}

#[test]
fn preset_swap_mid_session_then_dup_reuses_new_chain() {
    let mut pipe = headless_pipeline(VideoSettings::default(), Size::new(320, 240));
    let size = Size::new(64, 64);
    let px = solid_pixels(size, 0x22);
    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    assert!(pipe.chain().is_stock());

    let preset = write_two_pass_preset("preset_swap");
    pipe.set_shader_preset(Some(&preset)).expect("swap preset");
    assert!(!pipe.chain().is_stock());
    assert_eq!(pipe.settings().shader_preset.as_deref(), Some(preset.as_path()));

    // The rebuilt chain has no source until the next software frame arrives.
    assert_eq!(
        pipe.frame(Frame::Dup, &[]).expect("dup"),
        FrameOutcome::Dropped
    );
    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    let before = pipe.backend().draws().len();
    assert_eq!(
        pipe.frame(Frame::Dup, &[]).expect("dup"),
        FrameOutcome::Presented
    );
    assert_eq!(pipe.backend().draws().len(), before + 2);
    assert_eq!(pipe.chain().pass_output_size(0), Some(Size::new(160, 120)));
}

#[test]
fn hardware_frame_without_enable_is_rejected() {
    let mut pipe = headless_pipeline(VideoSettings::default(), Size::new(64, 48));
    let err = pipe
        .frame(Frame::Hardware { size: Size::new(8, 8) }, &[])
        .expect_err("no hw target");
    assert!(matches!(err, EngineError::Unsupported(_)), "got {err:?}");
}

#[test]
fn letterboxed_viewport_is_what_screenshots_capture() {
    let mut pipe = headless_pipeline(VideoSettings::default(), Size::new(640, 480));
    pipe.set_viewport(Viewport::new(80, 0, 480, 480));
    let size = Size::new(32, 32);
    let px = solid_pixels(size, 0x7f);
    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");

    let mut shot = Vec::new();
    let got = pipe.screenshot(&mut shot).expect("screenshot");
    assert_eq!(got, Size::new(480, 480));
    assert_eq!(shot.len(), 480 * 480 * 4);
}
