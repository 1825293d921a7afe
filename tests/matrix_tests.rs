// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the vertex/texture matrix builder

use camera_pipeline::matrix::{Mat4, MatrixOperator, ScaleType, identity};
use nalgebra::Vector4;

fn apply(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    let v = m * Vector4::new(x, y, 0.0, 1.0);
    (v.x, v.y)
}

fn assert_close(actual: (f32, f32), expected: (f32, f32), what: &str) {
    assert!(
        (actual.0 - expected.0).abs() < 1e-4 && (actual.1 - expected.1).abs() < 1e-4,
        "{}: expected {:?}, got {:?}",
        what,
        expected,
        actual
    );
}

#[test]
fn test_fit_center_letterboxes_wide_display() {
    let mut op = MatrixOperator::vertex(ScaleType::FitCenter);
    op.update(1600, 900, 640, 480);
    assert_close(op.base_scale(), (0.75, 1.0), "base scale");
    assert_close(apply(&op.final_matrix(), 1.0, 1.0), (0.75, 1.0), "top right corner");
}

#[test]
fn test_center_crop_overflows_tall_display() {
    let mut op = MatrixOperator::vertex(ScaleType::CenterCrop);
    op.update(480, 640, 640, 480);
    let (sx, sy) = op.base_scale();
    assert!(sx > 1.0, "Quad should overflow horizontally, got {}", sx);
    assert_eq!(sy, 1.0);
    assert_close((sx, sy), (16.0 / 9.0, 1.0), "base scale");
}

#[test]
fn test_aspect_preserving_modes_scale_uniformly() {
    for scale_type in [ScaleType::CenterCrop, ScaleType::FitCenter] {
        let mut op = MatrixOperator::vertex(scale_type);
        op.update(1600, 900, 640, 480);
        let (cx, cy) = op.content_scale();
        assert!(
            (cx - cy).abs() < 1e-4,
            "{:?} should keep source pixels square, got {}x{}",
            scale_type,
            cx,
            cy
        );
    }

    let mut stretch = MatrixOperator::vertex(ScaleType::FitXY);
    stretch.update(1600, 900, 640, 480);
    assert_eq!(stretch.base_scale(), (1.0, 1.0));
    let (cx, cy) = stretch.content_scale();
    assert!((cx - cy).abs() > 0.1, "FitXY stretches to the display");
}

#[test]
fn test_texture_center_crop_samples_middle() {
    let mut op = MatrixOperator::texture(ScaleType::CenterCrop);
    op.update(480, 480, 640, 480);
    assert_close(op.base_scale(), (0.75, 1.0), "sampled fraction");
    assert_close(apply(&op.final_matrix(), 0.0, 0.5), (0.125, 0.5), "left edge");
    assert_close(apply(&op.final_matrix(), 1.0, 0.5), (0.875, 0.5), "right edge");
}

#[test]
fn test_unchanged_values_do_not_recompute() {
    let mut op = MatrixOperator::vertex(ScaleType::CenterCrop);
    op.update(1280, 720, 640, 480);
    op.set_rotation(90.0);
    op.set_flip_h(true);
    let count = op.recompute_count();

    op.update(1280, 720, 640, 480);
    op.set_rotation(90.0);
    op.set_flip_h(true);
    op.set_scale_type(ScaleType::CenterCrop);
    op.set_scale_ratio(1.0);
    assert_eq!(op.recompute_count(), count, "Setting identical values should be a no-op");

    op.set_translate_y(0.5);
    assert_eq!(op.recompute_count(), count + 1);
}

#[test]
fn test_vertex_flip_mirrors_x() {
    let mut op = MatrixOperator::vertex(ScaleType::FitXY);
    op.set_flip_h(true);
    assert_close(apply(&op.final_matrix(), 0.5, 0.25), (-0.5, 0.25), "mirrored point");
    op.set_flip_h(false);
    assert_eq!(op.final_matrix(), identity());
}

#[test]
fn test_single_flip_reverses_rotation_direction() {
    let mut op = MatrixOperator::vertex(ScaleType::FitXY);
    op.set_rotation(90.0);
    assert_eq!(op.effective_rotation(), 90.0);

    // A horizontal flip becomes a vertical one after a quarter turn
    op.set_flip_h(true);
    assert_eq!(op.effective_flips(), (false, true));
    assert_eq!(op.effective_rotation(), -90.0);

    op.set_flip_v(true);
    assert_eq!(op.effective_rotation(), 90.0, "Two flips cancel out");
}

#[test]
fn test_scale_ratio_shrinks_content() {
    let mut op = MatrixOperator::vertex(ScaleType::FitXY);
    op.set_scale_ratio(0.5);
    assert_close(apply(&op.final_matrix(), 1.0, -1.0), (0.5, -0.5), "corner");
    assert_eq!(op.scale_ratio(), 0.5);
}
