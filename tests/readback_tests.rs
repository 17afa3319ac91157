// Readback integration tests for vsurf
//
// Drives whole frames through VirtualSurface::read_pixels on the headless
// platform and checks the adaptive staged/synchronous behavior, pixel
// layout and the autotest side channel.

use std::sync::Arc;
use vsurf::platform::headless::{HeadlessPlatform, TransferTiming};
use vsurf::platform::RenderMode;
use vsurf::{
    BufferMode, ConnectionId, DrawableId, FbConfig, LogicalBuffer, Phase, PixelFormat, Platform,
    ReadbackMode, ReadbackOutcome, ReadbackRequest, Rect, Runtime, SkipReason, SurfaceError,
    TransferFormat, TransferPath, VirtualSurface, VsurfConfig,
};

const CONN: ConnectionId = ConnectionId(1);

fn surface_with(
    config: VsurfConfig,
    fb_config: &FbConfig,
    width: u32,
    height: u32,
) -> (Arc<HeadlessPlatform>, Arc<Runtime>, VirtualSurface) {
    let platform = Arc::new(HeadlessPlatform::new());
    let runtime = Runtime::new(platform.clone(), config);
    let surface = VirtualSurface::new(runtime.clone(), CONN, DrawableId(0x200)).unwrap();
    surface.init(width, height, fb_config).unwrap();
    surface.set_direct(true);
    (platform, runtime, surface)
}

fn full_frame(width: u32, height: u32, format: PixelFormat) -> (ReadbackRequest, Vec<u8>) {
    let pitch = width as usize * format.size();
    let request = ReadbackRequest::new(
        Rect::new(0, 0, width, height),
        pitch,
        BufferMode::Front,
        format,
    );
    (request, vec![0u8; pitch * height as usize])
}

#[test]
fn test_blocking_driver_demotes_after_trial() {
    let (platform, _runtime, surface) =
        surface_with(VsurfConfig::default(), &FbConfig::rgba8(1), 800, 600);
    platform.set_transfer_timing(TransferTiming::blocking(0.9));
    let (request, mut frame) = full_frame(800, 600, PixelFormat::Rgbx);

    for n in 0..9 {
        let outcome = surface.read_pixels(&request, &mut frame).unwrap();
        assert_eq!(outcome, ReadbackOutcome::Completed(TransferPath::Staged));
        assert_eq!(
            surface.readback_phase(),
            Phase::Trial {
                frames: n + 1,
                sync_frames: n + 1
            }
        );
    }
    surface.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(surface.readback_phase(), Phase::Demoted);

    // Frame 11 onwards never touches a pixel buffer object
    platform.reset_calls();
    for _ in 0..5 {
        let outcome = surface.read_pixels(&request, &mut frame).unwrap();
        assert_eq!(outcome, ReadbackOutcome::Completed(TransferPath::Synchronous));
    }
    let calls = platform.calls();
    assert_eq!(calls.staged_reads, 0);
    assert!(calls.pack_buffer_allocations.is_empty());
    assert_eq!(calls.synchronous_reads, 5);
    assert_eq!(surface.readback_phase(), Phase::Demoted);
}

#[test]
fn test_overlapping_driver_stays_staged() {
    let (platform, _runtime, surface) =
        surface_with(VsurfConfig::default(), &FbConfig::rgba8(1), 64, 64);
    platform.set_transfer_timing(TransferTiming::overlapping());
    let (request, mut frame) = full_frame(64, 64, PixelFormat::Bgrx);

    for _ in 0..10 {
        surface.read_pixels(&request, &mut frame).unwrap();
    }
    assert_eq!(surface.readback_phase(), Phase::Stable);

    platform.reset_calls();
    for _ in 0..3 {
        surface.read_pixels(&request, &mut frame).unwrap();
    }
    let calls = platform.calls();
    assert_eq!(calls.staged_reads, 3);
    assert_eq!(calls.synchronous_reads, 0);
    // Storage is reused while the size does not change
    assert!(calls.pack_buffer_allocations.is_empty());
}

#[test]
fn test_half_blocking_frames_count_as_overlapping() {
    let (platform, _runtime, surface) =
        surface_with(VsurfConfig::default(), &FbConfig::rgba8(1), 16, 16);
    platform.set_transfer_timing(TransferTiming::blocking(0.5));
    let (request, mut frame) = full_frame(16, 16, PixelFormat::Rgbx);

    for _ in 0..10 {
        surface.read_pixels(&request, &mut frame).unwrap();
    }
    assert_eq!(surface.readback_phase(), Phase::Stable);
}

#[test]
fn test_format_change_restarts_trial() {
    let (platform, _runtime, surface) =
        surface_with(VsurfConfig::default(), &FbConfig::rgba8(1), 32, 32);
    platform.set_transfer_timing(TransferTiming::blocking(0.9));
    let (request, mut frame) = full_frame(32, 32, PixelFormat::Rgbx);
    for _ in 0..10 {
        surface.read_pixels(&request, &mut frame).unwrap();
    }
    assert_eq!(surface.readback_phase(), Phase::Demoted);

    // Same canonical format: still demoted
    surface.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(surface.readback_phase(), Phase::Demoted);

    let (rgb, mut rgb_frame) = full_frame(32, 32, PixelFormat::Rgb);
    let outcome = surface.read_pixels(&rgb, &mut rgb_frame).unwrap();
    assert_eq!(outcome, ReadbackOutcome::Completed(TransferPath::Staged));
    assert_eq!(
        surface.readback_phase(),
        Phase::Trial {
            frames: 1,
            sync_frames: 1
        }
    );
}

#[test]
fn test_channel_isolation_formats_share_an_epoch() {
    let (platform, _runtime, surface) =
        surface_with(VsurfConfig::default(), &FbConfig::rgba8(1), 8, 8);
    platform.set_transfer_timing(TransferTiming::blocking(1.0));
    let (red, mut frame) = full_frame(8, 8, PixelFormat::Comp);
    let red = red.with_transfer(TransferFormat::Red);
    for _ in 0..10 {
        surface.read_pixels(&red, &mut frame).unwrap();
    }
    assert_eq!(surface.readback_phase(), Phase::Demoted);

    let green = red.with_transfer(TransferFormat::Green);
    surface.read_pixels(&green, &mut frame).unwrap();
    assert_eq!(surface.readback_phase(), Phase::Demoted);
}

#[test]
fn test_synchronous_mode_never_stages() {
    let mut config = VsurfConfig::default();
    config.readback.mode = ReadbackMode::Sync;
    let (platform, _runtime, surface) = surface_with(config, &FbConfig::rgba8(1), 16, 16);
    platform.set_transfer_timing(TransferTiming::blocking(0.9));
    let (request, mut frame) = full_frame(16, 16, PixelFormat::Bgrx);

    for _ in 0..12 {
        let outcome = surface.read_pixels(&request, &mut frame).unwrap();
        assert_eq!(outcome, ReadbackOutcome::Completed(TransferPath::Synchronous));
    }
    let calls = platform.calls();
    assert_eq!(calls.staged_reads, 0);
    assert_eq!(calls.synchronous_reads, 12);
    assert_eq!(surface.readback_phase(), Phase::Synchronous);
}

#[test]
fn test_disabled_readback_leaves_destination_alone() {
    let mut config = VsurfConfig::default();
    config.readback.mode = ReadbackMode::None;
    let (platform, _runtime, surface) = surface_with(config, &FbConfig::rgba8(1), 4, 4);
    let (request, _) = full_frame(4, 4, PixelFormat::Bgrx);
    let mut frame = vec![0xAB; 64];

    let outcome = surface.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(outcome, ReadbackOutcome::Skipped(SkipReason::Disabled));
    assert!(frame.iter().all(|b| *b == 0xAB));
    assert_eq!(platform.calls().contexts_created, 0);
}

#[test]
fn test_selection_mode_skips_readback() {
    let fb_config = FbConfig::rgba8(1);
    let (platform, runtime, surface) = surface_with(VsurfConfig::default(), &fb_config, 4, 4);
    let app = runtime.create_context(CONN, &fb_config, true).unwrap();
    let handle = surface.active_target_handle();
    assert!(platform.make_current(CONN, handle, handle, Some(app)));
    platform.set_render_mode(RenderMode::Select);

    let (request, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    let outcome = surface.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(outcome, ReadbackOutcome::Skipped(SkipReason::RenderMode));
    assert_eq!(platform.calls().staged_reads + platform.calls().synchronous_reads, 0);

    platform.set_render_mode(RenderMode::Render);
    let outcome = surface.read_pixels(&request, &mut frame).unwrap();
    assert!(matches!(outcome, ReadbackOutcome::Completed(_)));
    // Quiet surfaces never warn
    assert_eq!(surface.render_mode_warnings(), 0);
}

#[test]
fn test_render_mode_skip_warns_once_per_surface() {
    let mut config = VsurfConfig::default();
    config.diagnostics.verbose = true;
    let fb_config = FbConfig::rgba8(1);
    let (platform, runtime, surface) = surface_with(config, &fb_config, 4, 4);
    let app = runtime.create_context(CONN, &fb_config, true).unwrap();
    let handle = surface.active_target_handle();
    assert!(platform.make_current(CONN, handle, handle, Some(app)));

    let (request, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    for mode in [RenderMode::Select, RenderMode::Feedback, RenderMode::Select] {
        platform.set_render_mode(mode);
        let outcome = surface.read_pixels(&request, &mut frame).unwrap();
        assert_eq!(outcome, ReadbackOutcome::Skipped(SkipReason::RenderMode));
        assert_eq!(surface.render_mode_warnings(), 1);
    }

    // A readback in between does not re-arm the warning
    platform.set_render_mode(RenderMode::Render);
    surface.read_pixels(&request, &mut frame).unwrap();
    platform.set_render_mode(RenderMode::Select);
    surface.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(surface.render_mode_warnings(), 1);

    // The count is per surface
    let other = VirtualSurface::new(runtime.clone(), CONN, DrawableId(0x201)).unwrap();
    other.init(4, 4, &fb_config).unwrap();
    other.set_direct(true);
    other.read_pixels(&request, &mut frame).unwrap();
    assert_eq!(other.render_mode_warnings(), 1);
}

#[test]
fn test_missing_pixel_buffer_extension_is_a_capability_error() {
    let fb_config = FbConfig::rgba8(1);
    let (platform, runtime, surface) = surface_with(VsurfConfig::default(), &fb_config, 4, 4);
    platform.set_extensions(&["GL_ARB_framebuffer_object"]);
    let app = runtime.create_context(CONN, &fb_config, true).unwrap();
    let handle = surface.active_target_handle();
    assert!(platform.make_current(CONN, handle, handle, Some(app)));

    let (request, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    let err = surface.read_pixels(&request, &mut frame).unwrap_err();
    assert!(matches!(err, SurfaceError::Capability(_)));

    // The application's binding survives the failure
    assert_eq!(platform.current().context, Some(app));
}

#[test]
fn test_native_pixels_land_top_row_last() {
    let mut config = VsurfConfig::default();
    config.readback.mode = ReadbackMode::Sync;
    let fb_config = FbConfig::rgba8(1);
    let (platform, _runtime, surface) = surface_with(config, &fb_config, 4, 2);
    let handle = surface.active_target_handle();
    platform.fill_surface(handle, LogicalBuffer::FrontLeft, [10, 20, 30, 255]);

    let (request, mut frame) = full_frame(4, 2, PixelFormat::Bgrx);
    surface.read_pixels(&request, &mut frame).unwrap();
    for px in frame.chunks_exact(4) {
        assert_eq!(px, &[30, 20, 10, 255]);
    }

    let (request, mut frame) = full_frame(4, 2, PixelFormat::Rgb);
    surface.read_pixels(&request, &mut frame).unwrap();
    for px in frame.chunks_exact(3) {
        assert_eq!(px, &[10, 20, 30]);
    }
}

#[test]
fn test_staged_and_synchronous_paths_agree() {
    let fb_config = FbConfig::rgba8(1).with_double_buffer(true);
    let mut sync_config = VsurfConfig::default();
    sync_config.readback.mode = ReadbackMode::Sync;

    let mut frames = Vec::new();
    for config in [VsurfConfig::default(), sync_config] {
        let (platform, runtime, surface) = surface_with(config, &fb_config, 8, 4);
        let app = runtime.create_context(CONN, &fb_config, true).unwrap();
        let handle = surface.active_target_handle();
        assert!(platform.make_current(CONN, handle, handle, Some(app)));
        platform.set_clear_color([0.0, 0.5, 1.0, 1.0]);
        platform.clear();
        platform.plot(3, 1, [200, 100, 50, 255]);
        surface.swap_buffers().unwrap();

        let (request, mut frame) = full_frame(8, 4, PixelFormat::Xbgr);
        surface.read_pixels(&request, &mut frame).unwrap();
        frames.push(frame);
    }
    assert_eq!(frames[0], frames[1]);
}

#[test]
fn test_autotest_reports_each_eye() {
    let mut config = VsurfConfig::default();
    config.diagnostics.autotest = true;
    let fb_config = FbConfig::rgba8(1).with_stereo(true);
    let (platform, runtime, surface) = surface_with(config, &fb_config, 4, 4);
    let handle = surface.active_target_handle();
    platform.fill_surface(handle, LogicalBuffer::FrontLeft, [1, 2, 3, 255]);
    platform.fill_surface(handle, LogicalBuffer::FrontRight, [4, 5, 6, 255]);

    let (left, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    surface.read_pixels(&left, &mut frame).unwrap();
    let mut right = left.with_stereo(true);
    right.buffer = BufferMode::FrontRight;
    surface.read_pixels(&right, &mut frame).unwrap();

    let report = runtime.autotest().left();
    assert_eq!(report.color, Some(0x030201));
    assert_eq!(report.frame, 1);
    assert_eq!(report.drawable, DrawableId(0x200));
    assert_eq!(report.connection, CONN);

    let report = runtime.autotest().right();
    assert_eq!(report.color, Some(0x060504));
    assert_eq!(report.frame, 1);

    surface.read_pixels(&left, &mut frame).unwrap();
    assert_eq!(runtime.autotest().left().frame, 2);
}

#[test]
fn test_autotest_rejects_non_uniform_frames() {
    let mut config = VsurfConfig::default();
    config.diagnostics.autotest = true;
    let fb_config = FbConfig::rgba8(1);
    let (platform, runtime, surface) = surface_with(config, &fb_config, 4, 4);
    let app = runtime.create_context(CONN, &fb_config, true).unwrap();
    let handle = surface.active_target_handle();
    assert!(platform.make_current(CONN, handle, handle, Some(app)));
    platform.plot(2, 2, [255, 255, 255, 255]);

    let (request, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    surface.read_pixels(&request, &mut frame).unwrap();
    let report = runtime.autotest().left();
    assert_eq!(report.color, None);
    assert_eq!(report.frame, 1);
}

#[test]
fn test_readback_restores_application_binding() {
    let fb_config = FbConfig::rgba8(1);
    let (platform, runtime, surface) = surface_with(VsurfConfig::default(), &fb_config, 4, 4);
    let app = runtime.create_context(CONN, &fb_config, true).unwrap();
    let handle = surface.active_target_handle();
    assert!(platform.make_current(CONN, handle, handle, Some(app)));

    let (request, mut frame) = full_frame(4, 4, PixelFormat::Bgrx);
    surface.read_pixels(&request, &mut frame).unwrap();

    let current = platform.current();
    assert_eq!(current.context, Some(app));
    assert_eq!(current.draw, handle);
    assert_eq!(current.read, handle);
}

#[test]
fn test_profiler_totals_follow_frames() {
    let mut config = VsurfConfig::default();
    config.readback.mode = ReadbackMode::Sync;
    let (_platform, _runtime, surface) = surface_with(config, &FbConfig::rgba8(1), 10, 10);
    let (request, mut frame) = full_frame(10, 10, PixelFormat::Bgrx);
    for _ in 0..4 {
        surface.read_pixels(&request, &mut frame).unwrap();
    }
    let (stereo, _) = full_frame(10, 10, PixelFormat::Bgrx);
    surface
        .read_pixels(&stereo.with_stereo(true), &mut frame)
        .unwrap();

    let stats = surface.readback_stats();
    assert_eq!(stats.pixels, 500);
    assert!((stats.frames - 4.5).abs() < f64::EPSILON);
    assert!(stats.mpixels_per_sec() > 0.0);
}
