//! Detection post-processing.
//!
//! Applied to every raw engine output, in this order:
//! 1. Priority reordering: privileged classes (bottle, cup) first, each
//!    partition sorted by descending confidence.
//! 2. Class-conditional confidence filtering.
//! 3. Occlusion resolution: a person box that covers a privileged box by more
//!    than the overlap ratio of its own area is shrunk along one edge until it
//!    only abuts the privileged boxes it covered.
//!
//! The pipeline is idempotent: feeding its output back in yields the same
//! detections.

use crate::detect::result::{BoundingBox, Detection};

pub const PERSON_CLASS: &str = "person";
pub const DEFAULT_PRIVILEGED_CLASSES: [&str; 2] = ["bottle", "cup"];
pub const DEFAULT_PRIVILEGED_THRESHOLD: f32 = 0.3;
pub const DEFAULT_PERSON_THRESHOLD: f32 = 0.7;
pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_OVERLAP_RATIO: f32 = 0.1;

/// Boxes never shrink below one unit in either dimension.
const MIN_BOX_EXTENT: f32 = 1.0;

/// Minimum confidence per class group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassThresholds {
    pub privileged: f32,
    pub person: f32,
    pub default: f32,
}

impl Default for ClassThresholds {
    fn default() -> Self {
        Self {
            privileged: DEFAULT_PRIVILEGED_THRESHOLD,
            person: DEFAULT_PERSON_THRESHOLD,
            default: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Clone, Debug)]
pub struct PostProcessor {
    privileged_classes: Vec<String>,
    thresholds: ClassThresholds,
    overlap_ratio: f32,
}

impl PostProcessor {
    pub fn new(
        privileged_classes: Vec<String>,
        thresholds: ClassThresholds,
        overlap_ratio: f32,
    ) -> Self {
        Self {
            privileged_classes,
            thresholds,
            overlap_ratio,
        }
    }

    pub fn privileged_classes(&self) -> &[String] {
        &self.privileged_classes
    }

    pub fn thresholds(&self) -> ClassThresholds {
        self.thresholds
    }

    pub fn is_privileged(&self, detection: &Detection) -> bool {
        self.privileged_classes
            .iter()
            .any(|class| detection.is_class(class))
    }

    fn is_person(&self, detection: &Detection) -> bool {
        detection.is_class(PERSON_CLASS) && !self.is_privileged(detection)
    }

    pub fn threshold_for(&self, detection: &Detection) -> f32 {
        if self.is_privileged(detection) {
            self.thresholds.privileged
        } else if detection.is_class(PERSON_CLASS) {
            self.thresholds.person
        } else {
            self.thresholds.default
        }
    }

    /// Run the full pipeline on one frame's raw detections.
    pub fn process(&self, raw: Vec<Detection>) -> Vec<Detection> {
        let mut detections = self.prioritize(raw);
        detections.retain(|d| d.confidence >= self.threshold_for(d));
        self.resolve_occlusions(&mut detections);
        detections
    }

    /// Stable sort: privileged partition first, then descending confidence.
    pub fn prioritize(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        detections.sort_by(|a, b| {
            self.is_privileged(b)
                .cmp(&self.is_privileged(a))
                .then(b.confidence.total_cmp(&a.confidence))
        });
        detections
    }

    /// Shrink person boxes away from privileged boxes they cover too much of.
    ///
    /// Each blocked person box is replaced in one step by a box that no
    /// privileged box triggers on, so a second run is a no-op.
    pub fn resolve_occlusions(&self, detections: &mut [Detection]) {
        let obstacles: Vec<BoundingBox> = detections
            .iter()
            .filter(|d| self.is_privileged(d))
            .map(|d| d.bbox)
            .collect();
        if obstacles.is_empty() {
            return;
        }

        for detection in detections.iter_mut() {
            if !self.is_person(detection) {
                continue;
            }
            let person = detection.bbox;
            if !self.is_blocked(&person, &obstacles) {
                continue;
            }
            let cleared = self.clear_overlaps(&person, &obstacles);
            log::trace!("person box {:?} shrunk to {:?}", person, cleared);
            detection.bbox = cleared;
        }
    }

    fn triggers(&self, person: &BoundingBox, obstacle: &BoundingBox) -> bool {
        person.intersection_area(obstacle) > self.overlap_ratio * person.area()
    }

    fn is_blocked(&self, person: &BoundingBox, obstacles: &[BoundingBox]) -> bool {
        obstacles.iter().any(|obstacle| self.triggers(person, obstacle))
    }

    /// Cheapest single-edge shrink that clears every privileged box.
    ///
    /// Cuts are taken at privileged box edges. A candidate must not touch
    /// any box that blocked the original person box and must not trigger on
    /// any other. Ties go to left, right, top, bottom in that order.
    fn clear_overlaps(&self, person: &BoundingBox, obstacles: &[BoundingBox]) -> BoundingBox {
        let blocking: Vec<&BoundingBox> = obstacles
            .iter()
            .filter(|obstacle| self.triggers(person, obstacle))
            .collect();
        let accepted = |candidate: &BoundingBox| {
            blocking.iter().all(|obstacle| !candidate.overlaps(obstacle))
                && !self.is_blocked(candidate, obstacles)
        };

        let mut candidates = Vec::new();
        for edge in [Edge::Left, Edge::Right, Edge::Top, Edge::Bottom] {
            for obstacle in obstacles {
                let (cut, cost) = match edge {
                    Edge::Left => (obstacle.right(), obstacle.right() - person.x),
                    Edge::Right => (obstacle.x, person.right() - obstacle.x),
                    Edge::Top => (obstacle.bottom(), obstacle.bottom() - person.y),
                    Edge::Bottom => (obstacle.y, person.bottom() - obstacle.y),
                };
                if cost > 0.0 {
                    candidates.push((shrink_edge(person, edge, cut), cost));
                }
            }
        }

        candidates
            .into_iter()
            .filter(|(candidate, _)| accepted(candidate))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate)
            .unwrap_or_else(|| beyond_all(person, obstacles))
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(
            DEFAULT_PRIVILEGED_CLASSES
                .iter()
                .map(|class| class.to_string())
                .collect(),
            ClassThresholds::default(),
            DEFAULT_OVERLAP_RATIO,
        )
    }
}

/// Move one edge of `person` to `cut`.
///
/// When the remaining extent would drop below one unit the box collapses to
/// a one-unit sliver on the far side of the cut.
fn shrink_edge(person: &BoundingBox, edge: Edge, cut: f32) -> BoundingBox {
    match edge {
        Edge::Left => BoundingBox {
            x: cut,
            width: (person.right() - cut).max(MIN_BOX_EXTENT),
            ..*person
        },
        Edge::Right => {
            let width = cut - person.x;
            if width >= MIN_BOX_EXTENT {
                BoundingBox { width, ..*person }
            } else {
                BoundingBox {
                    x: cut - MIN_BOX_EXTENT,
                    width: MIN_BOX_EXTENT,
                    ..*person
                }
            }
        }
        Edge::Top => BoundingBox {
            y: cut,
            height: (person.bottom() - cut).max(MIN_BOX_EXTENT),
            ..*person
        },
        Edge::Bottom => {
            let height = cut - person.y;
            if height >= MIN_BOX_EXTENT {
                BoundingBox { height, ..*person }
            } else {
                BoundingBox {
                    y: cut - MIN_BOX_EXTENT,
                    height: MIN_BOX_EXTENT,
                    ..*person
                }
            }
        }
    }
}

// Sliver right of the right-most privileged box. The left-edge cut at that
// box is always a candidate and clears everything, so this only guards the
// empty case.
fn beyond_all(person: &BoundingBox, obstacles: &[BoundingBox]) -> BoundingBox {
    let x = obstacles
        .iter()
        .map(BoundingBox::right)
        .fold(person.x, f32::max);
    BoundingBox {
        x,
        width: (person.right() - x).max(MIN_BOX_EXTENT),
        ..*person
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, b: [f32; 4]) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(b[0], b[1], b[2], b[3]))
    }

    #[test]
    fn privileged_classes_sort_first() {
        let processor = PostProcessor::default();
        let out = processor.prioritize(vec![
            det("dog", 0.9, [0.0, 0.0, 1.0, 1.0]),
            det("cup", 0.4, [0.0, 0.0, 1.0, 1.0]),
            det("bottle", 0.6, [0.0, 0.0, 1.0, 1.0]),
            det("person", 0.95, [0.0, 0.0, 1.0, 1.0]),
        ]);
        let labels: Vec<&str> = out.iter().map(|d| d.class_label.as_str()).collect();
        assert_eq!(labels, vec!["bottle", "cup", "person", "dog"]);
    }

    #[test]
    fn thresholds_depend_on_class() {
        let processor = PostProcessor::default();
        let out = processor.process(vec![
            det("bottle", 0.31, [0.0, 0.0, 5.0, 5.0]),
            det("cup", 0.29, [10.0, 0.0, 5.0, 5.0]),
            det("person", 0.69, [20.0, 0.0, 5.0, 5.0]),
            det("person", 0.7, [30.0, 0.0, 5.0, 5.0]),
            det("chair", 0.5, [40.0, 0.0, 5.0, 5.0]),
            det("chair", 0.49, [50.0, 0.0, 5.0, 5.0]),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].class_label, "bottle");
        assert_eq!(out[1].class_label, "person");
        assert_eq!(out[1].confidence, 0.7);
        assert_eq!(out[2].class_label, "chair");
        assert_eq!(out[2].confidence, 0.5);
    }

    #[test]
    fn person_shrinks_along_smallest_edge() {
        let processor = PostProcessor::default();
        let out = processor.process(vec![
            det("person", 0.8, [0.0, 0.0, 100.0, 200.0]),
            det("bottle", 0.4, [10.0, 10.0, 50.0, 60.0]),
        ]);
        // left: 60, right: 90, top: 70, bottom: 190
        assert_eq!(out[0].class_label, "bottle");
        assert_eq!(out[1].bbox, BoundingBox::new(60.0, 0.0, 40.0, 200.0));
        assert!(!out[1].bbox.overlaps(&out[0].bbox));
    }

    #[test]
    fn small_overlap_leaves_person_untouched() {
        let processor = PostProcessor::default();
        // 1800 shared out of 20000 is below the 10% trigger.
        let out = processor.process(vec![
            det("person", 0.8, [0.0, 0.0, 100.0, 200.0]),
            det("bottle", 0.4, [10.0, 10.0, 30.0, 60.0]),
        ]);
        assert_eq!(out[1].bbox, BoundingBox::new(0.0, 0.0, 100.0, 200.0));
    }

    #[test]
    fn swallowed_person_collapses_to_sliver() {
        let processor = PostProcessor::default();
        let out = processor.process(vec![
            det("cup", 0.9, [0.0, 0.0, 100.0, 100.0]),
            det("person", 0.9, [40.0, 40.0, 10.0, 10.0]),
        ]);
        let person = out[1].bbox;
        assert!(person.width >= 1.0 && person.height >= 1.0);
        assert!(!person.overlaps(&out[0].bbox));
    }

    #[test]
    fn bottom_edge_wins_when_obstacle_sits_low() {
        let processor = PostProcessor::default();
        let out = processor.process(vec![
            det("person", 0.9, [0.0, 0.0, 100.0, 100.0]),
            det("bottle", 0.9, [0.0, 80.0, 100.0, 40.0]),
        ]);
        assert_eq!(out[1].bbox, BoundingBox::new(0.0, 0.0, 100.0, 80.0));
    }

    #[test]
    fn person_between_two_bottles_clears_both() {
        let processor = PostProcessor::default();
        let out = processor.process(vec![
            det("bottle", 0.9, [0.0, 0.0, 10.0, 100.0]),
            det("bottle", 0.8, [10.0, 0.0, 10.0, 100.0]),
            det("person", 0.9, [5.0, 0.0, 10.0, 100.0]),
        ]);
        let person = out[2].bbox;
        assert_eq!(person, BoundingBox::new(20.0, 0.0, 1.0, 100.0));
        assert!(!person.overlaps(&out[0].bbox));
        assert!(!person.overlaps(&out[1].bbox));
    }

    #[test]
    fn cut_at_far_bottle_clears_both_in_one_move() {
        let processor = PostProcessor::default();
        // Cutting at the first cup alone would leave the person on the second.
        let out = processor.process(vec![
            det("person", 0.9, [0.0, 0.0, 100.0, 100.0]),
            det("cup", 0.9, [0.0, 0.0, 20.0, 100.0]),
            det("cup", 0.9, [20.0, 0.0, 20.0, 100.0]),
        ]);
        assert_eq!(out[2].bbox, BoundingBox::new(40.0, 0.0, 60.0, 100.0));
    }
}
