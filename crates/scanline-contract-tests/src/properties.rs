//! Cross-crate invariants checked against the headless backend.

use scanline_buffers::{RenderTargetPool, ScratchBufferRing, TargetSpec};
use scanline_core::{DrawTarget, PixelFormat, SessionState, Size, VideoSettings, Viewport};
use scanline_preset::Preset;
use scanline_runtime::{
    ChainOptions, ChainOutput, Collaborators, ContextCache, FilterChain, Frame, FrameOutcome,
};
use scanline_runtime_headless::HeadlessBackend;

use crate::support::*;

const VP: Viewport = Viewport::new(0, 0, 320, 240);

fn chain_from_json(gpu: &mut HeadlessBackend, json: &str) -> FilterChain {
    let preset = Preset::from_json_str(json).expect("fixture preset");
    FilterChain::build(gpu, &preset, ChainOptions::default(), &Collaborators::default())
        .expect("build chain")
}

fn push(
    chain: &mut FilterChain,
    gpu: &mut HeadlessBackend,
    state: &mut SessionState,
    size: Size,
    fill: u8,
) {
    let px = solid_pixels(size, fill);
    chain
        .upload_input(gpu, &rgba(size, &px), state)
        .expect("upload");
}

/// Resize idempotence: an unchanged shape never reallocates.
#[test]
fn ensure_with_unchanged_spec_leaves_pool_untouched() {
    let mut gpu = HeadlessBackend::new();
    let mut pool = RenderTargetPool::new();
    let spec = TargetSpec::new(Size::new(128, 96), PixelFormat::Rgba8Unorm);
    let id = pool.allocate(&mut gpu, spec).expect("allocate");
    let before = pool.stats();

    for _ in 0..8 {
        assert!(!pool.ensure(&mut gpu, id, spec).expect("ensure"));
    }
    assert_eq!(pool.stats(), before);
    assert_eq!(gpu.live_texture_count(), 1);
}

#[test]
fn constant_viewport_frames_allocate_once() {
    init_tracing();
    let mut pipe = headless_pipeline(
        VideoSettings {
            shader_preset: Some(write_two_pass_preset("idempotent")),
            ..VideoSettings::default()
        },
        Size::new(320, 240),
    );
    let size = Size::new(64, 48);
    let px = solid_pixels(size, 9);

    pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame 0");
    let settled = pipe.chain().pool_stats();
    for _ in 0..6 {
        let out = pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
        assert_eq!(out, FrameOutcome::Presented);
    }
    assert_eq!(pipe.chain().pool_stats(), settled);
}

/// Feedback ping-pong: frame k's `PassFeedback0` is what the pass wrote in frame k-1.
#[test]
fn feedback_reads_previous_frame_output() {
    let mut gpu = HeadlessBackend::new();
    let mut state = SessionState::default();
    let mut chain = chain_from_json(&mut gpu, PRESET_FEEDBACK_JSON);
    assert!(chain.has_feedback(0));

    for k in 0..6u8 {
        push(&mut chain, &mut gpu, &mut state, Size::new(32, 32), k);
        let out = chain.execute(&mut gpu, VP, &mut state).expect("execute");
        assert!(matches!(out, ChainOutput::Texture { .. }));
    }

    let draws = gpu.draws();
    assert_eq!(draws.len(), 6);
    for k in 1..draws.len() {
        assert_eq!(
            draws[k].input("PassFeedback0").map(|i| i.marker),
            Some(draws[k - 1].marker),
            "frame {k}"
        );
        let DrawTarget::Texture { texture, .. } = draws[k].target else {
            panic!("feedback pass must render into a texture");
        };
        assert_ne!(
            draws[k].input("PassFeedback0").map(|i| i.texture),
            Some(texture),
            "frame {k} reads and writes the same texture"
        );
    }
}

/// History rotation: slot i holds the source uploaded i frames ago.
#[test]
fn history_slots_hold_past_sources_in_order() {
    let mut gpu = HeadlessBackend::new();
    let mut state = SessionState::default();
    let mut chain = chain_from_json(&mut gpu, PRESET_HISTORY_JSON);
    assert_eq!(chain.history_depth(), 2);

    let mut uploaded = Vec::new();
    for k in 0..6u8 {
        push(&mut chain, &mut gpu, &mut state, Size::new(16, 16), k);
        chain.execute(&mut gpu, VP, &mut state).expect("execute");
        let slots = chain.history_textures();
        assert_eq!(slots.len(), 3);
        uploaded.push(gpu.texture_marker(slots[0]).expect("slot 0 marker"));

        if k >= 2 {
            let k = k as usize;
            for (i, tex) in slots.iter().enumerate() {
                assert_eq!(
                    gpu.texture_marker(*tex),
                    Some(uploaded[k - i]),
                    "frame {k}, OriginalHistory{i}"
                );
            }
        }
    }
}

#[test]
fn source_resize_reinitialises_every_history_slot() {
    let mut gpu = HeadlessBackend::new();
    let mut state = SessionState::default();
    let mut chain = chain_from_json(&mut gpu, PRESET_HISTORY_JSON);

    for k in 0..3u8 {
        push(&mut chain, &mut gpu, &mut state, Size::new(16, 16), k);
        chain.execute(&mut gpu, VP, &mut state).expect("execute");
    }

    push(&mut chain, &mut gpu, &mut state, Size::new(64, 32), 7);
    chain.execute(&mut gpu, VP, &mut state).expect("execute");
    let slots = chain.history_textures();
    assert_eq!(slots.len(), 3);
    for tex in &slots {
        assert_eq!(gpu.texture_size(*tex), Some(Size::new(64, 32)));
    }
    // Older slots were cleared, not carried over from the 16x16 frames.
    for tex in &slots[1..] {
        assert_eq!(gpu.texture_marker(*tex), Some(0));
    }
}

/// Hard sync: after every present at most `hard_sync_frames` fences are outstanding.
#[test]
fn hard_sync_bounds_outstanding_fences() {
    for frames in 0..=3u32 {
        let mut pipe = headless_pipeline(
            VideoSettings {
                hard_sync: true,
                hard_sync_frames: frames,
                ..VideoSettings::default()
            },
            Size::new(64, 48),
        );
        let size = Size::new(8, 8);
        let px = solid_pixels(size, 1);
        for f in 0..10 {
            pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
            let outstanding = pipe.scheduler().outstanding_fences();
            assert!(
                outstanding <= frames as usize,
                "hard_sync_frames {frames}, frame {f}: {outstanding} fences outstanding"
            );
        }
        assert_eq!(pipe.scheduler().outstanding_fences(), frames as usize);
    }
}

#[test]
fn hard_sync_is_skipped_while_nonblocking() {
    let mut pipe = headless_pipeline(
        VideoSettings {
            hard_sync: true,
            hard_sync_frames: 0,
            ..VideoSettings::default()
        },
        Size::new(64, 48),
    );
    pipe.set_nonblock(true).expect("nonblock");
    let size = Size::new(8, 8);
    let px = solid_pixels(size, 1);
    for _ in 0..4 {
        pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    }
    assert_eq!(pipe.backend().fence_waits(), 0);
    assert_eq!(pipe.scheduler().outstanding_fences(), 0);
}

/// Scratch wraparound: a handle survives `capacity - 1` further acquisitions.
#[test]
fn scratch_handle_survives_until_ring_wraps() {
    let mut gpu = HeadlessBackend::new();
    let mut ring = ScratchBufferRing::new(4);

    let handle = ring.acquire(&mut gpu, &[0xAB; 64]).expect("acquire");
    for i in 0..3u8 {
        ring.acquire(&mut gpu, &[i; 64]).expect("acquire");
        assert!(ring.is_live(&handle), "after {} further acquires", i + 1);
        assert_eq!(gpu.buffer_bytes(handle.buffer), Some(&[0xAB; 64][..]));
    }

    ring.acquire(&mut gpu, &[0xCD; 64]).expect("acquire");
    assert!(!ring.is_live(&handle));
    assert_eq!(gpu.buffer_bytes(handle.buffer), Some(&[0xCD; 64][..]));

    ring.release(&mut gpu);
    assert_eq!(gpu.live_buffer_count(), 0);
}

#[test]
fn pipeline_shutdown_releases_every_gpu_object() {
    let mut pipe = headless_pipeline(
        VideoSettings {
            shader_preset: Some(write_two_pass_preset("shutdown")),
            hard_sync: true,
            hard_sync_frames: 2,
            // Hands the backend back through the cache so its object tables can be inspected.
            cache_context: true,
            ..VideoSettings::default()
        },
        Size::new(320, 240),
    );
    let size = Size::new(32, 32);
    let px = solid_pixels(size, 3);
    for _ in 0..3 {
        pipe.frame(Frame::Pixels(rgba(size, &px)), &[]).expect("frame");
    }
    assert!(pipe.backend().live_texture_count() > 0);
    assert_eq!(pipe.scheduler().outstanding_fences(), 2);

    let mut cache = ContextCache::new();
    pipe.shutdown(&mut cache).expect("shutdown");
    let gpu = cache.take().expect("backend cached");
    assert_eq!(gpu.live_texture_count(), 0);
    assert_eq!(gpu.live_buffer_count(), 0);
    assert_eq!(gpu.live_fence_count(), 0);
}
