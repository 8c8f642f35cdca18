//! Decide when newly seen object classes are announced.
//!
use std::{
    collections::HashSet,
    fmt,
    time::{Duration, Instant},
};

use common::Detection;
use itertools::Itertools;

/// Default time after an announcement during which nothing else is announced.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);

/// Newly seen classes to be spoken, in order of first appearance in the frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub classes: Vec<String>,
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I see {}.", self.classes.join(", "))
    }
}

/// Speech throttling state owned by the detection loop.
///
/// The set of spoken classes is replaced by the classes of the frame which
/// triggered an announcement. Classes missing from that frame are forgotten
/// and get announced again once they come back.
pub struct AnnouncementDebouncer {
    spoken: HashSet<String>,
    cooldown: Duration,
    /// Time of the last announcement while its cooldown has not run out yet.
    fired_at: Option<Instant>,
}

impl AnnouncementDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            spoken: HashSet::new(),
            cooldown,
            fired_at: None,
        }
    }

    /// Whether announcements are currently suppressed.
    pub fn is_debouncing(&mut self, now: Instant) -> bool {
        match self.fired_at {
            Some(fired_at) if now.saturating_duration_since(fired_at) < self.cooldown => true,
            Some(_) => {
                self.fired_at = None;
                false
            }
            None => false,
        }
    }

    /// Feed the detections of one frame and return what to say, if anything.
    pub fn observe(&mut self, detections: &[Detection], now: Instant) -> Option<Announcement> {
        if self.is_debouncing(now) {
            return None;
        }

        let current: Vec<&str> = detections.iter().map(|d| d.class.as_str()).unique().collect();
        let new_classes: Vec<String> = current
            .iter()
            .filter(|class| !self.spoken.contains(**class))
            .map(|class| class.to_string())
            .collect();

        if new_classes.is_empty() {
            return None;
        }

        self.spoken = current.into_iter().map(str::to_owned).collect();
        self.fired_at = Some(now);
        log::debug!("Announcing {new_classes:?}, cooling down for {:?}", self.cooldown);

        Some(Announcement {
            classes: new_classes,
        })
    }

    pub fn spoken_classes(&self) -> &HashSet<String> {
        &self.spoken
    }
}

impl Default for AnnouncementDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use common::BoundingBox;

    fn detections(classes: &[&str]) -> Vec<Detection> {
        classes
            .iter()
            .map(|class| Detection::new(*class, 0.9, BoundingBox::new(10.0, 10.0, 50.0, 100.0)))
            .collect()
    }

    fn spoken(debouncer: &AnnouncementDebouncer) -> Vec<&str> {
        debouncer
            .spoken_classes()
            .iter()
            .map(String::as_str)
            .sorted()
            .collect()
    }

    #[test]
    fn test_person_then_dog_scenario() {
        let mut debouncer = AnnouncementDebouncer::default();
        let start = Instant::now();

        let frame_1 = vec![Detection::new(
            "person",
            0.92,
            BoundingBox::new(10.0, 10.0, 50.0, 100.0),
        )];
        let announcement = debouncer.observe(&frame_1, start).map(|a| a.to_string());
        assert_eq!(announcement.as_deref(), Some("I see person."));
        assert_eq!(spoken(&debouncer), ["person"]);

        let frame_2 = detections(&["person", "dog"]);
        assert_eq!(debouncer.observe(&frame_2, start + Duration::from_millis(500)), None);
        assert_eq!(spoken(&debouncer), ["person"]);

        let announcement = debouncer
            .observe(&frame_2, start + Duration::from_millis(2100))
            .map(|a| a.to_string());
        assert_eq!(announcement.as_deref(), Some("I see dog."));
        assert_eq!(spoken(&debouncer), ["dog", "person"]);
    }

    #[test]
    fn test_known_classes_stay_quiet() {
        let mut debouncer = AnnouncementDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.observe(&detections(&["cat", "cup"]), start).is_some());

        let later = start + Duration::from_secs(5);
        assert_eq!(debouncer.observe(&detections(&["cup"]), later), None);
        assert_eq!(debouncer.observe(&detections(&[]), later), None);
        assert!(!debouncer.is_debouncing(later));
        // Nothing fired, so nothing was forgotten
        assert_eq!(spoken(&debouncer), ["cat", "cup"]);
    }

    #[test]
    fn test_new_classes_only_and_deduplicated() {
        let mut debouncer = AnnouncementDebouncer::default();
        let start = Instant::now();

        debouncer.observe(&detections(&["person"]), start);

        let announcement = debouncer.observe(
            &detections(&["dog", "person", "cat", "dog"]),
            start + Duration::from_secs(3),
        );
        assert_eq!(
            announcement,
            Some(Announcement {
                classes: vec!["dog".to_string(), "cat".to_string()]
            })
        );
        assert_eq!(
            announcement.map(|a| a.to_string()).as_deref(),
            Some("I see dog, cat.")
        );
    }

    #[test]
    fn test_suppressed_during_cooldown() {
        let mut debouncer = AnnouncementDebouncer::new(Duration::from_millis(2000));
        let start = Instant::now();

        assert!(debouncer.observe(&detections(&["person"]), start).is_some());
        assert!(debouncer.is_debouncing(start));

        for millis in [0, 1, 1000, 1999] {
            let at = start + Duration::from_millis(millis);
            assert_eq!(debouncer.observe(&detections(&["bird", "car"]), at), None);
        }

        let after = start + Duration::from_millis(2000);
        assert!(!debouncer.is_debouncing(after));
        let announcement = debouncer.observe(&detections(&["bird", "car"]), after);
        assert_eq!(
            announcement.map(|a| a.classes),
            Some(vec!["bird".to_string(), "car".to_string()])
        );
    }

    #[test]
    fn test_set_is_replaced_not_merged() {
        let mut debouncer = AnnouncementDebouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        let step = Duration::from_millis(200);

        assert!(debouncer.observe(&detections(&["person"]), start).is_some());
        // Person leaves the frame while the dog shows up
        assert!(debouncer.observe(&detections(&["dog"]), start + step).is_some());
        assert_eq!(spoken(&debouncer), ["dog"]);

        // Person returns and is announced again
        let announcement = debouncer.observe(&detections(&["person", "dog"]), start + step * 2);
        assert_eq!(announcement.map(|a| a.classes), Some(vec!["person".to_string()]));
    }

    #[test]
    fn test_zero_cooldown_never_debounces() {
        let mut debouncer = AnnouncementDebouncer::new(Duration::ZERO);
        let now = Instant::now();

        assert!(debouncer.observe(&detections(&["kite"]), now).is_some());
        assert!(!debouncer.is_debouncing(now));
        assert!(debouncer.observe(&detections(&["bench"]), now).is_some());
    }
}
