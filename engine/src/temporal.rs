use tracing::trace;

/// Undo/redo stacks over batches of steps.
///
/// Each entry is the list of steps one user action produced. A stroke
/// (pointer-down to pointer-up) collects every step recorded while it is open
/// into a single entry.
#[derive(Debug)]
pub struct TemporalController<S> {
    past: Vec<Vec<S>>,
    future: Vec<Vec<S>>,
    stroke: Option<Vec<S>>,
    paused: bool,
}

impl<S> Default for TemporalController<S> {
    fn default() -> Self {
        Self {
            past: Vec::new(),
            future: Vec::new(),
            stroke: None,
            paused: false,
        }
    }
}

impl<S> TemporalController<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one step. Suppressed entirely while paused.
    pub fn record(&mut self, step: S) {
        if self.paused {
            trace!("history paused, dropping step");
            return;
        }
        match self.stroke.as_mut() {
            Some(stroke) => stroke.push(step),
            None => self.push_entry(vec![step]),
        }
    }

    fn push_entry(&mut self, entry: Vec<S>) {
        if entry.is_empty() {
            return;
        }
        self.past.push(entry);
        self.future.clear();
    }

    pub fn begin_stroke(&mut self) {
        if self.stroke.is_none() {
            self.stroke = Some(Vec::new());
        }
    }

    /// Closes the open stroke. Returns whether an entry was pushed.
    pub fn end_stroke(&mut self) -> bool {
        match self.stroke.take() {
            Some(steps) if !steps.is_empty() => {
                self.push_entry(steps);
                true
            }
            _ => false,
        }
    }

    pub fn in_stroke(&self) -> bool {
        self.stroke.is_some()
    }

    /// Pops the newest entry and moves it to the redo stack. The caller
    /// reverts the returned steps in reverse order.
    pub fn undo(&mut self) -> Option<&[S]> {
        self.end_stroke();
        let entry = self.past.pop()?;
        self.future.push(entry);
        self.future.last().map(Vec::as_slice)
    }

    /// Pops the newest undone entry back onto the past stack. The caller
    /// re-applies the returned steps in order.
    pub fn redo(&mut self) -> Option<&[S]> {
        self.end_stroke();
        let entry = self.future.pop()?;
        self.past.push(entry);
        self.past.last().map(Vec::as_slice)
    }

    /// Stops recording. An open stroke is closed first so the steps it
    /// already holds stay undoable.
    pub fn pause(&mut self) {
        self.end_stroke();
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.stroke = None;
    }
}

#[cfg(test)]
mod tests {
    use super::TemporalController;

    #[test]
    fn undo_redo_walk_the_stacks() {
        let mut history = TemporalController::new();
        history.record(1);
        history.record(2);
        assert_eq!(history.undo(), Some(&[2][..]));
        assert_eq!(history.undo(), Some(&[1][..]));
        assert_eq!(history.undo(), None);
        assert_eq!(history.redo(), Some(&[1][..]));
        assert_eq!(history.undo_depth(), 1);
        assert_eq!(history.redo_depth(), 1);
    }

    #[test]
    fn new_record_clears_redo() {
        let mut history = TemporalController::new();
        history.record("a");
        history.undo();
        assert!(history.can_redo());
        history.record("b");
        assert!(!history.can_redo());
        assert_eq!(history.redo(), None);
    }

    #[test]
    fn stroke_coalesces_steps() {
        let mut history = TemporalController::new();
        history.begin_stroke();
        for step in 0..100 {
            history.record(step);
        }
        assert_eq!(history.undo_depth(), 0);
        assert!(history.end_stroke());
        assert_eq!(history.undo_depth(), 1);
        assert_eq!(history.undo().map(<[i32]>::len), Some(100));

        history.begin_stroke();
        assert!(!history.end_stroke());
    }

    #[test]
    fn paused_history_drops_steps_without_backfill() {
        let mut history = TemporalController::new();
        history.pause();
        history.record(1);
        history.resume();
        assert!(!history.can_undo());
        history.record(2);
        assert_eq!(history.undo(), Some(&[2][..]));
    }

    #[test]
    fn pausing_mid_stroke_keeps_the_partial_stroke() {
        let mut history = TemporalController::new();
        history.begin_stroke();
        history.record(1);
        history.record(2);
        history.pause();
        assert!(!history.in_stroke());
        history.record(3);
        history.resume();
        assert!(!history.end_stroke());
        assert_eq!(history.undo(), Some(&[1, 2][..]));
        assert!(!history.can_undo());
    }

    #[test]
    fn undo_closes_an_open_stroke_first() {
        let mut history = TemporalController::new();
        history.begin_stroke();
        history.record(1);
        history.record(2);
        assert_eq!(history.undo(), Some(&[1, 2][..]));
        assert!(!history.in_stroke());
    }
}
