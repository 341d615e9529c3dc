use crate::locate::Region;

/// Tracker lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No region fixed yet; frames produce no output.
    Searching,
    /// Region fixed; every visited frame produces output.
    Tracking,
    /// Both hysteresis counters reached their limits.
    Ended,
}

/// Hysteresis state for one run.
///
/// Pure bookkeeping: it never calls the localizer or the detector, it only
/// folds their outcomes, so the end rule can be exercised directly.
#[derive(Clone, Debug)]
pub struct TrackerState {
    phase: Phase,
    region: Option<Region>,
    start_frame: Option<String>,
    end_frame: Option<String>,
    consecutive_region_misses: u32,
    consecutive_empty_prediction_frames: u32,
    empty_prediction_frame_buffer: Vec<String>,
    max_region_misses: u32,
    max_empty_predictions: u32,
}

impl TrackerState {
    pub fn new(max_region_misses: u32, max_empty_predictions: u32) -> Self {
        Self {
            phase: Phase::Searching,
            region: None,
            start_frame: None,
            end_frame: None,
            consecutive_region_misses: 0,
            consecutive_empty_prediction_frames: 0,
            empty_prediction_frame_buffer: Vec::new(),
            max_region_misses,
            max_empty_predictions,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn start_frame(&self) -> Option<&str> {
        self.start_frame.as_deref()
    }

    pub fn end_frame(&self) -> Option<&str> {
        self.end_frame.as_deref()
    }

    pub fn region_misses(&self) -> u32 {
        self.consecutive_region_misses
    }

    pub fn empty_predictions(&self) -> u32 {
        self.consecutive_empty_prediction_frames
    }

    pub fn empty_buffer(&self) -> &[String] {
        &self.empty_prediction_frame_buffer
    }

    /// Fix the crop region and start tracking. Only the first call while
    /// searching has an effect.
    pub fn fix_region(&mut self, frame_id: &str, region: Region) -> bool {
        if self.phase != Phase::Searching {
            return false;
        }
        self.region = Some(region);
        self.start_frame = Some(frame_id.to_string());
        self.consecutive_region_misses = 0;
        self.consecutive_empty_prediction_frames = 0;
        self.empty_prediction_frame_buffer.clear();
        self.phase = Phase::Tracking;
        true
    }

    /// Fold one tracked frame into the counters.
    ///
    /// `region_visible` is `None` when no presence check ran for this frame
    /// (the frame that fixed the region). Returns the end frame id when this
    /// observation ends the match.
    pub fn observe(
        &mut self,
        frame_id: &str,
        region_visible: Option<bool>,
        has_predictions: bool,
    ) -> Option<String> {
        if self.phase != Phase::Tracking {
            return None;
        }

        match region_visible {
            Some(true) => self.consecutive_region_misses = 0,
            Some(false) => self.consecutive_region_misses += 1,
            None => {}
        }

        if has_predictions {
            self.consecutive_empty_prediction_frames = 0;
            self.empty_prediction_frame_buffer.clear();
        } else {
            self.consecutive_empty_prediction_frames += 1;
            self.empty_prediction_frame_buffer.push(frame_id.to_string());
        }

        if self.consecutive_region_misses >= self.max_region_misses
            && self.consecutive_empty_prediction_frames >= self.max_empty_predictions
        {
            let end = self
                .empty_prediction_frame_buffer
                .first()
                .cloned()
                .unwrap_or_else(|| frame_id.to_string());
            self.end_frame = Some(end.clone());
            self.phase = Phase::Ended;
            return Some(end);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracking() -> TrackerState {
        let mut state = TrackerState::new(3, 2);
        assert!(state.fix_region("f0", Region::new(1, 2, 3, 4)));
        state
    }

    #[test]
    fn fix_region_happens_once() {
        let mut state = tracking();
        assert_eq!(state.phase(), Phase::Tracking);
        assert!(!state.fix_region("f5", Region::new(9, 9, 9, 9)));
        assert_eq!(state.region(), Some(Region::new(1, 2, 3, 4)));
        assert_eq!(state.start_frame(), Some("f0"));
    }

    #[test]
    fn observations_before_tracking_are_ignored() {
        let mut state = TrackerState::new(1, 1);
        assert_eq!(state.observe("f0", Some(false), false), None);
        assert_eq!(state.region_misses(), 0);
        assert!(state.empty_buffer().is_empty());
    }

    #[test]
    fn favorable_observations_reset_their_own_counter() {
        let mut state = tracking();
        state.observe("f1", Some(false), false);
        state.observe("f2", Some(false), true);
        assert_eq!(state.region_misses(), 2);
        assert_eq!(state.empty_predictions(), 0);
        assert!(state.empty_buffer().is_empty());

        state.observe("f3", Some(true), false);
        assert_eq!(state.region_misses(), 0);
        assert_eq!(state.empty_predictions(), 1);
        assert_eq!(state.empty_buffer(), ["f3".to_string()]);
    }

    #[test]
    fn ends_only_when_both_counters_reach_limits() {
        let mut state = tracking();
        assert_eq!(state.observe("f1", Some(true), false), None);
        assert_eq!(state.observe("f2", Some(false), false), None);
        assert_eq!(state.observe("f3", Some(false), false), None);
        let end = state.observe("f4", Some(false), false);
        assert_eq!(end.as_deref(), Some("f1"));
        assert_eq!(state.phase(), Phase::Ended);
        assert_eq!(state.end_frame(), Some("f1"));
        assert_eq!(state.observe("f5", Some(false), false), None);
    }

    #[test]
    fn start_frame_observation_skips_presence() {
        let mut state = TrackerState::new(1, 1);
        state.fix_region("f0", Region::new(0, 0, 1, 1));
        assert_eq!(state.observe("f0", None, false), None);
        assert_eq!(state.region_misses(), 0);
        assert_eq!(state.empty_predictions(), 1);
    }
}
