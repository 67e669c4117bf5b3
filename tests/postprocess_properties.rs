use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ekolenz_detect::{BoundingBox, Detection, PostProcessor};

const OTHER_LABELS: [&str; 4] = ["person", "person", "dog", "chair"];
const FRAMES: u64 = 500;

fn random_box(rng: &mut StdRng) -> BoundingBox {
    BoundingBox::new(
        rng.gen_range(0..280) as f32,
        rng.gen_range(0..200) as f32,
        rng.gen_range(1..120) as f32,
        rng.gen_range(1..120) as f32,
    )
}

/// A frame with one to three privileged objects among arbitrary others.
fn random_frame(rng: &mut StdRng) -> Vec<Detection> {
    let mut detections = Vec::new();
    for _ in 0..rng.gen_range(1..=3) {
        detections.push(Detection::new(
            if rng.gen_bool(0.5) { "bottle" } else { "cup" },
            rng.gen_range(0.3..=1.0),
            random_box(rng),
        ));
    }
    for _ in 0..rng.gen_range(0..8) {
        let label = OTHER_LABELS[rng.gen_range(0..OTHER_LABELS.len())];
        detections.push(Detection::new(label, rng.gen_range(0.0..=1.0), random_box(rng)));
    }
    detections
}

/// Person standing among adjacent cups, as in a crowded shelf shot.
fn crowded_frame(rng: &mut StdRng) -> Vec<Detection> {
    let mut detections = Vec::new();
    let y = rng.gen_range(0..50) as f32;
    let mut x = rng.gen_range(0..50) as f32;
    for _ in 0..3 {
        let width = rng.gen_range(1..30) as f32;
        detections.push(Detection::new(
            "cup",
            0.9,
            BoundingBox::new(x, y, width, rng.gen_range(10..100) as f32),
        ));
        x += width;
    }
    detections.push(Detection::new("person", 0.9, random_box(rng)));
    detections
}

#[test]
fn every_kept_detection_meets_its_class_threshold() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(0x0b07_71e5);
    for _ in 0..FRAMES {
        let raw = random_frame(&mut rng);
        let expected = raw
            .iter()
            .filter(|d| d.confidence >= processor.threshold_for(d))
            .count();
        let kept = processor.process(raw);
        assert_eq!(kept.len(), expected);
        for detection in &kept {
            assert!(detection.confidence >= processor.threshold_for(detection));
        }
    }
}

#[test]
fn privileged_detections_lead_in_descending_confidence() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..FRAMES {
        let kept = processor.process(random_frame(&mut rng));
        let split = kept
            .iter()
            .position(|d| !processor.is_privileged(d))
            .unwrap_or(kept.len());
        assert!(kept[split..].iter().all(|d| !processor.is_privileged(d)));
        for part in [&kept[..split], &kept[split..]] {
            assert!(part
                .windows(2)
                .all(|pair| pair[0].confidence >= pair[1].confidence));
        }
    }
}

fn assert_people_clear(processor: &PostProcessor, kept: &[Detection]) {
    let obstacles: Vec<BoundingBox> = kept
        .iter()
        .filter(|d| processor.is_privileged(d))
        .map(|d| d.bbox)
        .collect();
    for person in kept.iter().filter(|d| d.class_label == "person") {
        assert!(person.bbox.width >= 1.0 && person.bbox.height >= 1.0);
        for obstacle in &obstacles {
            assert!(
                person.bbox.intersection_area(obstacle) <= 0.1 * person.bbox.area(),
                "{:?} still covers {:?}",
                person.bbox,
                obstacle
            );
        }
    }
}

#[test]
fn person_boxes_end_up_clear_of_privileged_boxes() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..FRAMES {
        let kept = processor.process(random_frame(&mut rng));
        assert_people_clear(&processor, &kept);
    }
}

#[test]
fn person_among_adjacent_cups_ends_up_clear() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(2000);
    for _ in 0..2000 {
        let raw = crowded_frame(&mut rng);
        let once = processor.process(raw);
        assert_people_clear(&processor, &once);
        assert_eq!(processor.process(once.clone()), once);
    }
}

#[test]
fn second_pass_changes_nothing() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(1234);
    for _ in 0..FRAMES {
        let once = processor.process(random_frame(&mut rng));
        let twice = processor.process(once.clone());
        assert_eq!(once, twice);
    }
}

#[test]
fn non_person_boxes_are_never_moved() {
    let processor = PostProcessor::default();
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..FRAMES {
        let raw = random_frame(&mut rng);
        let kept = processor.process(raw.clone());
        for detection in kept.iter().filter(|d| d.class_label != "person") {
            assert!(raw
                .iter()
                .any(|r| r.class_label == detection.class_label && r.bbox == detection.bbox));
        }
    }
}

#[test]
fn bottle_in_front_of_person_with_dog_nearby() {
    let processor = PostProcessor::default();
    let dog = BoundingBox::new(150.0, 150.0, 40.0, 40.0);
    let out = processor.process(vec![
        Detection::new("person", 0.8, BoundingBox::new(0.0, 0.0, 100.0, 200.0)),
        Detection::new("bottle", 0.4, BoundingBox::new(10.0, 10.0, 50.0, 60.0)),
        Detection::new("dog", 0.6, dog),
    ]);
    let labels: Vec<&str> = out.iter().map(|d| d.class_label.as_str()).collect();
    assert_eq!(labels, vec!["bottle", "person", "dog"]);
    assert_eq!(out[1].bbox, BoundingBox::new(60.0, 0.0, 40.0, 200.0));
    assert_eq!(out[2].bbox, dog);
}
