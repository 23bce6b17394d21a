//! Window toolkit without a display. Used when no native backend is
//! available (the preview stays dark but the lifecycle keeps working) and as
//! the observable window in tests.
//!
//! [`HeadlessToolkit::new`] keeps only the latest value of each observation,
//! so a long session holds at most one frame. [`HeadlessToolkit::recording`]
//! keeps the full history.

use crate::preview::frame::PreviewFrame;
use crate::preview::toolkit::{NativeWindow, WindowEvent, WindowPlacement, WindowSpec, WindowToolkit};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Default)]
struct Record {
    keep_history: bool,
    opened: usize,
    open_threads: Vec<ThreadId>,
    destroyed: usize,
    destroy_threads: Vec<ThreadId>,
    released: usize,
    rendered: usize,
    frames: Vec<PreviewFrame>,
    texts: Vec<String>,
    titles: Vec<String>,
    placements: Vec<WindowPlacement>,
    toolbar: Vec<bool>,
    minimized: usize,
    hidden: usize,
    restored: usize,
    queued_events: VecDeque<WindowEvent>,
    fail_open: bool,
    fail_minimize: bool,
    failing_destroys: usize,
    panic_on_next_pump: bool,
    fail_next_pump: bool,
    open_delay: Duration,
    destroy_delay: Duration,
}

impl Record {
    fn note<T>(keep_history: bool, history: &mut Vec<T>, item: T) {
        if !keep_history {
            history.clear();
        }
        history.push(item);
    }
}

/// Observes and steers every window opened by a [`HeadlessToolkit`].
///
/// Without history the list accessors hold at most the latest entry.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRecorder {
    record: Arc<Mutex<Record>>,
}

impl HeadlessRecorder {
    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn opened_count(&self) -> usize {
        self.lock().opened
    }

    pub fn open_threads(&self) -> Vec<ThreadId> {
        self.lock().open_threads.clone()
    }

    pub fn destroyed_count(&self) -> usize {
        self.lock().destroyed
    }

    pub fn destroy_threads(&self) -> Vec<ThreadId> {
        self.lock().destroy_threads.clone()
    }

    pub fn released_count(&self) -> usize {
        self.lock().released
    }

    pub fn keeps_history(&self) -> bool {
        self.lock().keep_history
    }

    /// Frames rendered so far, whether or not they were kept.
    pub fn rendered_count(&self) -> usize {
        self.lock().rendered
    }

    pub fn frames(&self) -> Vec<PreviewFrame> {
        self.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<PreviewFrame> {
        self.lock().frames.last().cloned()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lock().texts.clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.lock().texts.last().cloned()
    }

    pub fn titles(&self) -> Vec<String> {
        self.lock().titles.clone()
    }

    pub fn placements(&self) -> Vec<WindowPlacement> {
        self.lock().placements.clone()
    }

    pub fn toolbar_states(&self) -> Vec<bool> {
        self.lock().toolbar.clone()
    }

    pub fn minimize_count(&self) -> usize {
        self.lock().minimized
    }

    pub fn hide_count(&self) -> usize {
        self.lock().hidden
    }

    pub fn restore_count(&self) -> usize {
        self.lock().restored
    }

    /// Queues an event for the next pump of the open window.
    pub fn push_event(&self, event: WindowEvent) {
        self.lock().queued_events.push_back(event);
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn fail_minimize(&self, fail: bool) {
        self.lock().fail_minimize = fail;
    }

    pub fn fail_next_destroys(&self, count: usize) {
        self.lock().failing_destroys = count;
    }

    pub fn panic_on_next_pump(&self) {
        self.lock().panic_on_next_pump = true;
    }

    pub fn fail_next_pump(&self) {
        self.lock().fail_next_pump = true;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    pub fn set_destroy_delay(&self, delay: Duration) {
        self.lock().destroy_delay = delay;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessToolkit {
    recorder: HeadlessRecorder,
}

impl HeadlessToolkit {
    /// Dark preview that remembers only the latest frame, text, title and
    /// placement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps every frame, text, title and placement ever applied.
    pub fn recording() -> Self {
        let toolkit = Self::default();
        toolkit.recorder.lock().keep_history = true;
        toolkit
    }

    pub fn recorder(&self) -> HeadlessRecorder {
        self.recorder.clone()
    }
}

impl WindowToolkit for HeadlessToolkit {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn open(&self, spec: &WindowSpec) -> Result<Box<dyn NativeWindow>> {
        let delay = self.recorder.lock().open_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut record = self.recorder.lock();
        if record.fail_open {
            bail!("headless window creation disabled");
        }
        let keep = record.keep_history;
        record.opened += 1;
        Record::note(keep, &mut record.open_threads, thread::current().id());
        Record::note(keep, &mut record.titles, spec.title.clone());
        Record::note(keep, &mut record.placements, spec.placement);
        drop(record);
        Ok(Box::new(HeadlessWindow {
            recorder: self.recorder.clone(),
            position: spec.placement.position,
        }))
    }
}

struct HeadlessWindow {
    recorder: HeadlessRecorder,
    position: Option<(i32, i32)>,
}

impl NativeWindow for HeadlessWindow {
    fn pump_events(&mut self, wait: Duration) -> Result<Vec<WindowEvent>> {
        let events: Vec<WindowEvent> = {
            let mut record = self.recorder.lock();
            if std::mem::take(&mut record.panic_on_next_pump) {
                drop(record);
                panic!("headless event loop panicked");
            }
            if std::mem::take(&mut record.fail_next_pump) {
                bail!("headless event loop failed");
            }
            record.queued_events.drain(..).collect()
        };
        if events.is_empty() {
            thread::sleep(wait);
        }
        for event in &events {
            if let WindowEvent::Moved { x, y } = event {
                self.position = Some((*x, *y));
            }
        }
        Ok(events)
    }

    fn render(&mut self, frame: &PreviewFrame) -> Result<()> {
        let mut record = self.recorder.lock();
        record.rendered += 1;
        let keep = record.keep_history;
        Record::note(keep, &mut record.frames, frame.clone());
        Ok(())
    }

    fn set_signal_text(&mut self, text: &str) -> Result<()> {
        let mut record = self.recorder.lock();
        let keep = record.keep_history;
        Record::note(keep, &mut record.texts, text.to_string());
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        let mut record = self.recorder.lock();
        let keep = record.keep_history;
        Record::note(keep, &mut record.titles, title.to_string());
        Ok(())
    }

    fn apply_placement(&mut self, placement: &WindowPlacement) -> Result<()> {
        {
            let mut record = self.recorder.lock();
            let keep = record.keep_history;
            Record::note(keep, &mut record.placements, *placement);
        }
        if placement.position.is_some() {
            self.position = placement.position;
        }
        Ok(())
    }

    fn set_toolbar_visible(&mut self, visible: bool) -> Result<()> {
        let mut record = self.recorder.lock();
        let keep = record.keep_history;
        Record::note(keep, &mut record.toolbar, visible);
        Ok(())
    }

    fn minimize(&mut self) -> Result<()> {
        let mut record = self.recorder.lock();
        if record.fail_minimize {
            bail!("headless minimize disabled");
        }
        record.minimized += 1;
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        self.recorder.lock().hidden += 1;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        self.recorder.lock().restored += 1;
        Ok(())
    }

    fn position(&self) -> Option<(i32, i32)> {
        self.position
    }

    fn release_resources(&mut self) -> Result<()> {
        self.recorder.lock().released += 1;
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        let delay = self.recorder.lock().destroy_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut record = self.recorder.lock();
        if record.failing_destroys > 0 {
            record.failing_destroys -= 1;
            bail!("headless destroy failed");
        }
        record.destroyed += 1;
        let keep = record.keep_history;
        Record::note(keep, &mut record.destroy_threads, thread::current().id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WindowSpec {
        WindowSpec {
            title: "Watch Point".into(),
            display_index: 0,
            placement: WindowPlacement {
                width: 64,
                height: 64,
                position: None,
            },
            show_toolbar: true,
        }
    }

    #[test]
    fn default_window_lets_go_of_replaced_frames() {
        let toolkit = HeadlessToolkit::new();
        let mut window = toolkit.open(&spec()).unwrap();
        let first = PreviewFrame::solid(64, 64, [1, 2, 3, 255]);
        window.render(&first).unwrap();
        assert_eq!(first.share_count(), 2);

        for shade in 0..50u8 {
            window.render(&PreviewFrame::solid(64, 64, [shade, 0, 0, 255])).unwrap();
            window.set_signal_text(&format!("step {shade}")).unwrap();
        }

        let recorder = toolkit.recorder();
        assert_eq!(first.share_count(), 1);
        assert_eq!(recorder.rendered_count(), 51);
        assert_eq!(recorder.frames().len(), 1);
        assert_eq!(recorder.texts(), vec!["step 49".to_string()]);
        let last = recorder.last_frame().unwrap();
        assert_eq!(last.image().get_pixel(0, 0).0, [49, 0, 0, 255]);
    }

    #[test]
    fn recording_window_keeps_every_frame() {
        let toolkit = HeadlessToolkit::recording();
        let mut window = toolkit.open(&spec()).unwrap();
        let first = PreviewFrame::solid(8, 8, [9, 9, 9, 255]);
        window.render(&first).unwrap();
        window.render(&PreviewFrame::solid(8, 8, [0; 4])).unwrap();
        window.set_title("second").unwrap();

        let recorder = toolkit.recorder();
        assert!(recorder.keeps_history());
        assert_eq!(recorder.frames().len(), 2);
        assert!(recorder.frames()[0].same_frame(&first));
        assert_eq!(recorder.titles(), vec!["Watch Point".to_string(), "second".to_string()]);
    }
}
