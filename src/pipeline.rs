use anyhow::Result;
use chrono::Local;
use opencv::core::Mat;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::detection::{Detection, FrameAnnotations};
use crate::logs::{EventLog, FrameEvent, LabelLog};
use crate::overlay::{draw_annotations, draw_hud, fps_from_elapsed};
use crate::video::resize_frame;

pub trait FrameSource {
    /// `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
}

pub trait Detector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

pub trait Display {
    /// Show the frame; returns true when the user asked to quit.
    fn show(&mut self, frame: &Mat) -> Result<bool>;
}

impl<T: Display + ?Sized> Display for Box<T> {
    fn show(&mut self, frame: &Mat) -> Result<bool> {
        (**self).show(frame)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub person_detections: u64,
    pub vehicle_detections: u64,
    pub quit_by_user: bool,
}

impl RunSummary {
    fn record(&mut self, annotations: &FrameAnnotations) {
        self.frames += 1;
        self.person_detections += annotations.person_count as u64;
        self.vehicle_detections += annotations.vehicle_count as u64;
    }

    /// Running totals for the periodic progress line.
    fn progress(&self, fps: f64) -> String {
        format!(
            "frames={} person_detections={} vehicle_detections={} fps={:.2}",
            self.frames, self.person_detections, self.vehicle_detections, fps
        )
    }
}

pub struct Pipeline<S, D, V> {
    source: S,
    detector: D,
    display: V,
    label_log: LabelLog,
    event_log: Option<EventLog>,
    log_interval: Duration,
}

impl<S: FrameSource, D: Detector, V: Display> Pipeline<S, D, V> {
    pub fn new(source: S, detector: D, display: V, label_log: LabelLog) -> Self {
        Self {
            source,
            detector,
            display,
            label_log,
            event_log: None,
            log_interval: Duration::from_secs(5),
        }
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn with_log_interval(mut self, log_interval: Duration) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Process frames until the source ends or the user quits. The source and
    /// display are dropped on return, whichever way the loop exits.
    pub fn run(mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut last_summary = Instant::now();

        loop {
            let start = Instant::now();
            let Some(raw) = self.source.next_frame()? else {
                break;
            };
            let mut frame = resize_frame(&raw)?;

            let detections = self.detector.detect(&frame)?;
            let annotations = FrameAnnotations::from_detections(&detections);
            draw_annotations(&mut frame, &annotations)?;

            let fps = fps_from_elapsed(start.elapsed());
            draw_hud(
                &mut frame,
                annotations.person_count,
                annotations.vehicle_count,
                fps,
            )?;

            if self.display.show(&frame)? {
                summary.quit_by_user = true;
                break;
            }

            self.label_log.append(&Local::now(), &annotations.labels)?;
            summary.record(&annotations);

            if let Some(logger) = self.event_log.as_mut() {
                logger.frame(&FrameEvent {
                    frame_index: summary.frames,
                    detections: detections.len(),
                    person_count: annotations.person_count,
                    vehicle_count: annotations.vehicle_count,
                    fps,
                    labels: &annotations.labels,
                })?;
            }

            if last_summary.elapsed() >= self.log_interval {
                tracing::info!("{}", summary.progress(fps));
                if let Some(logger) = self.event_log.as_mut() {
                    logger.flush()?;
                }
                last_summary = Instant::now();
            }
        }

        if let Some(logger) = self.event_log.as_mut() {
            logger.summary(&summary)?;
        }
        tracing::info!(
            "Finished: frames={} person_detections={} vehicle_detections={} quit_by_user={}",
            summary.frames,
            summary.person_detections,
            summary.vehicle_detections,
            summary.quit_by_user
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FRAME_HEIGHT, FRAME_WIDTH};
    use anyhow::bail;
    use opencv::core::{Scalar, CV_8UC3};
    use opencv::prelude::*;
    use regex::Regex;
    use std::{cell::Cell, collections::VecDeque, path::Path, rc::Rc};

    struct ScriptedSource {
        remaining: usize,
        released: Rc<Cell<bool>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Mat>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Mat::new_rows_cols_with_default(
                720,
                1280,
                CV_8UC3,
                Scalar::all(0.0),
            )?))
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.released.set(true);
        }
    }

    fn source(frames: usize) -> (ScriptedSource, Rc<Cell<bool>>) {
        let released = Rc::new(Cell::new(false));
        (
            ScriptedSource {
                remaining: frames,
                released: Rc::clone(&released),
            },
            released,
        )
    }

    #[derive(Default)]
    struct ScriptedDetector {
        frames: VecDeque<Vec<Detection>>,
        sizes: Vec<(i32, i32)>,
        fail: bool,
    }

    impl Detector for &mut ScriptedDetector {
        fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
            if self.fail {
                bail!("inference failed");
            }
            self.sizes.push((frame.cols(), frame.rows()));
            Ok(self.frames.pop_front().unwrap_or_default())
        }
    }

    struct QuitOn {
        shown: usize,
        quit_at: Option<usize>,
    }

    impl Display for QuitOn {
        fn show(&mut self, _frame: &Mat) -> Result<bool> {
            self.shown += 1;
            Ok(self.quit_at == Some(self.shown))
        }
    }

    fn never_quit() -> QuitOn {
        QuitOn {
            shown: 0,
            quit_at: None,
        }
    }

    fn det(class_id: usize) -> Detection {
        Detection::new([10.0, 10.0, 50.0, 90.0], 0.75, class_id)
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn logs_one_line_per_frame_including_empty_frames() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("detected_objects.txt");
        let (src, released) = source(3);
        let mut detector = ScriptedDetector {
            frames: VecDeque::from(vec![
                vec![det(0), det(2), det(16)],
                vec![],
                vec![det(7), det(0), det(0)],
            ]),
            ..Default::default()
        };

        let summary = Pipeline::new(
            src,
            &mut detector,
            never_quit(),
            LabelLog::open(&log_path).unwrap(),
        )
        .run()
        .unwrap();

        assert!(released.get());
        assert_eq!(
            summary,
            RunSummary {
                frames: 3,
                person_detections: 3,
                vehicle_detections: 2,
                quit_by_user: false,
            }
        );

        let lines = read_lines(&log_path);
        assert_eq!(lines.len(), 3);
        let ts = r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}: ";
        assert!(Regex::new(&format!("{ts}person, car$")).unwrap().is_match(&lines[0]));
        assert!(Regex::new(&format!("{ts}$")).unwrap().is_match(&lines[1]));
        assert!(Regex::new(&format!("{ts}truck, person, person$"))
            .unwrap()
            .is_match(&lines[2]));
    }

    #[test]
    fn detector_sees_resized_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (src, _) = source(2);
        let mut detector = ScriptedDetector::default();

        Pipeline::new(
            src,
            &mut detector,
            never_quit(),
            LabelLog::open(&dir.path().join("log.txt")).unwrap(),
        )
        .run()
        .unwrap();

        assert_eq!(detector.sizes, vec![(FRAME_WIDTH, FRAME_HEIGHT); 2]);
    }

    #[test]
    fn quit_stops_before_logging_that_frame() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let (src, released) = source(5);
        let mut detector = ScriptedDetector::default();
        let display = QuitOn {
            shown: 0,
            quit_at: Some(2),
        };

        let summary = Pipeline::new(src, &mut detector, display, LabelLog::open(&log_path).unwrap())
            .run()
            .unwrap();

        assert!(summary.quit_by_user);
        assert_eq!(summary.frames, 1);
        assert_eq!(read_lines(&log_path).len(), 1);
        assert!(released.get());
    }

    #[test]
    fn errors_propagate_and_still_release_source() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let (src, released) = source(3);
        let mut detector = ScriptedDetector {
            fail: true,
            ..Default::default()
        };

        let result = Pipeline::new(src, &mut detector, never_quit(), LabelLog::open(&log_path).unwrap())
            .run();

        assert!(result.is_err());
        assert!(released.get());
        assert!(read_lines(&log_path).is_empty());
    }

    #[test]
    fn writes_frame_and_summary_events() {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.ndjson");
        let (src, _) = source(2);
        let mut detector = ScriptedDetector {
            frames: VecDeque::from(vec![vec![det(0), det(5)]]),
            ..Default::default()
        };

        Pipeline::new(
            src,
            &mut detector,
            never_quit(),
            LabelLog::open(&dir.path().join("log.txt")).unwrap(),
        )
        .with_event_log(EventLog::create(&events_path).unwrap())
        .with_log_interval(Duration::ZERO)
        .run()
        .unwrap();

        let events: Vec<serde_json::Value> = read_lines(&events_path)
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "frame");
        assert_eq!(events[0]["labels"], serde_json::json!(["person", "bus"]));
        assert_eq!(events[1]["person_count"], 0);
        assert_eq!(events[2]["event"], "summary");
        assert_eq!(events[2]["vehicle_detections"], 1);
    }

    #[test]
    fn progress_reports_running_totals() {
        let mut summary = RunSummary::default();
        summary.record(&FrameAnnotations::from_detections(&[det(0), det(0), det(2)]));
        summary.record(&FrameAnnotations::from_detections(&[det(0)]));
        assert_eq!(
            summary.progress(24.5),
            "frames=2 person_detections=3 vehicle_detections=1 fps=24.50"
        );
    }
}
