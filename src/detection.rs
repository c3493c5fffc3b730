use opencv::core::{Rect, Scalar};

/// COCO-80 class names, indexed by the class id a YOLOv8 export emits.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

pub const VEHICLE_CLASSES: [&str; 4] = ["car", "truck", "bus", "motorcycle"];

pub fn class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

/// One object reported by the model for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: [f32; 4], score: f32, class_id: usize) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            score,
            class_id,
            class_name: class_name(class_id).to_string(),
        }
    }

    /// Box in integer pixel coordinates, truncated toward zero.
    pub fn rect(&self) -> Rect {
        let (x1, y1, x2, y2) = (self.x1 as i32, self.y1 as i32, self.x2 as i32, self.y2 as i32);
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Person,
    Vehicle,
}

impl Category {
    pub fn of(class_name: &str) -> Option<Self> {
        if class_name == "person" {
            Some(Category::Person)
        } else if VEHICLE_CLASSES.contains(&class_name) {
            Some(Category::Vehicle)
        } else {
            None
        }
    }

    /// BGR draw color.
    pub fn color(self) -> Scalar {
        match self {
            Category::Person => Scalar::new(0.0, 255.0, 0.0, 0.0),
            Category::Vehicle => Scalar::new(0.0, 0.0, 255.0, 0.0),
        }
    }
}

/// Uppercase the first character, lowercase the rest.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub rect: Rect,
    pub label: String,
    pub category: Category,
}

/// Everything derived from one frame's detections: what to draw, the
/// per-frame counts, and the class names to log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameAnnotations {
    pub kept: Vec<Annotation>,
    pub person_count: usize,
    pub vehicle_count: usize,
    pub labels: Vec<String>,
}

impl FrameAnnotations {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut frame = FrameAnnotations::default();
        for det in detections {
            let Some(category) = Category::of(&det.class_name) else {
                continue;
            };
            let label = match category {
                Category::Person => {
                    frame.person_count += 1;
                    format!("Person {} ({:.2})", frame.person_count, det.score)
                }
                Category::Vehicle => {
                    frame.vehicle_count += 1;
                    format!(
                        "{} {} ({:.2})",
                        capitalize(&det.class_name),
                        frame.vehicle_count,
                        det.score
                    )
                }
            };
            frame.kept.push(Annotation {
                rect: det.rect(),
                label,
                category,
            });
            frame.labels.push(det.class_name.clone());
        }
        frame
    }
}
