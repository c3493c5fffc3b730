use anyhow::Result;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
};
use std::time::Duration;

use crate::detection::{Category, FrameAnnotations};

const LABEL_OFFSET: i32 = 10;

/// Instantaneous rate for one loop iteration.
pub fn fps_from_elapsed(elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

pub fn fps_text(fps: f64) -> String {
    format!("FPS: {:.2}", fps)
}

pub fn draw_annotations(frame: &mut Mat, annotations: &FrameAnnotations) -> Result<()> {
    for kept in &annotations.kept {
        let color = kept.category.color();
        let r = kept.rect;
        imgproc::rectangle_points(
            frame,
            core::Point::new(r.x, r.y),
            core::Point::new(r.x + r.width, r.y + r.height),
            color,
            1,
            imgproc::LINE_8,
            0,
        )?;
        let origin = core::Point::new(r.x, r.y - LABEL_OFFSET);
        imgproc::put_text(
            frame,
            &kept.label,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

pub fn draw_hud(frame: &mut Mat, person_count: usize, vehicle_count: usize, fps: f64) -> Result<()> {
    let lines = [
        (
            format!("People Count: {}", person_count),
            core::Point::new(20, 50),
            0.8,
            Category::Person.color(),
        ),
        (
            format!("Vehicle Count: {}", vehicle_count),
            core::Point::new(20, 80),
            0.8,
            Category::Vehicle.color(),
        ),
        (
            fps_text(fps),
            core::Point::new(20, 110),
            0.6,
            Scalar::new(255.0, 255.0, 0.0, 0.0),
        ),
    ];
    for (text, origin, scale, color) in lines {
        imgproc::put_text(
            frame,
            &text,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            scale,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}
