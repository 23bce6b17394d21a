use crate::preview::controller::ControllerHandle;
use crate::preview::frame::PreviewFrame;
use crate::preview::state::{can_transition, PreviewLifecycle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Fields guarded by the entry lock: the latest frame, text staged before the
/// controller exists, and the controller handle itself. The handle shares
/// the lock with `pending_text` so staged text is flushed exactly once.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    pub(crate) image: Option<PreviewFrame>,
    pub(crate) pending_text: Option<String>,
    pub(crate) controller: Option<ControllerHandle>,
}

/// Bookkeeping for the one live preview window.
///
/// The flags only ever move one way or are idempotent overwrites.
#[derive(Debug)]
pub struct WindowEntry {
    id: u64,
    display_index: AtomicUsize,
    mailbox: Mutex<Mailbox>,
    running: AtomicBool,
    minimized: AtomicBool,
    closing: AtomicBool,
    close_started_at: Mutex<Option<Instant>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
    owner: OnceLock<ThreadId>,
    created_at: Instant,
}

impl WindowEntry {
    pub(crate) fn new(
        id: u64,
        display_index: usize,
        image: PreviewFrame,
        text: Option<String>,
    ) -> Self {
        Self {
            id,
            display_index: AtomicUsize::new(display_index),
            mailbox: Mutex::new(Mailbox {
                image: Some(image),
                pending_text: text,
                controller: None,
            }),
            running: AtomicBool::new(true),
            minimized: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close_started_at: Mutex::new(None),
            thread: Mutex::new(None),
            thread_name: format!("watchpoint-render-{id}"),
            owner: OnceLock::new(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn display_index(&self) -> usize {
        self.display_index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_display_index(&self, index: usize) {
        self.display_index.store(index, Ordering::SeqCst);
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swaps in the latest frame and routes non-empty text either to the live
    /// controller or to the pending slot. `None` never clears staged text.
    pub(crate) fn stage_frame(&self, frame: PreviewFrame, text: Option<String>) {
        let mut mailbox = self.mailbox();
        mailbox.image = Some(frame);
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return;
        };
        match &mailbox.controller {
            Some(controller) => controller.update_signal_text(text),
            None => mailbox.pending_text = Some(text),
        }
    }

    /// Returns the current frame if it is not the one last rendered.
    pub(crate) fn frame_if_changed(&self, last: Option<&PreviewFrame>) -> Option<PreviewFrame> {
        let mailbox = self.mailbox();
        let current = mailbox.image.as_ref()?;
        match last {
            Some(last) if last.same_frame(current) => None,
            _ => Some(current.clone()),
        }
    }

    /// Publishes the controller and hands back the text staged before it
    /// existed.
    pub(crate) fn register_controller(&self, handle: ControllerHandle) -> Option<String> {
        let before = self.lifecycle();
        let staged = {
            let mut mailbox = self.mailbox();
            mailbox.controller = Some(handle);
            mailbox.pending_text.take()
        };
        self.log_transition(before);
        staged
    }

    pub fn controller(&self) -> Option<ControllerHandle> {
        self.mailbox().controller.clone()
    }

    pub fn has_controller(&self) -> bool {
        self.mailbox().controller.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_minimized(&self) {
        let before = self.lifecycle();
        self.minimized.store(true, Ordering::SeqCst);
        self.log_transition(before);
    }

    pub(crate) fn mark_restored(&self) {
        let before = self.lifecycle();
        self.minimized.store(false, Ordering::SeqCst);
        self.log_transition(before);
    }

    pub(crate) fn request_close(&self, now: Instant) {
        let before = self.lifecycle();
        self.running.store(false, Ordering::SeqCst);
        if !self.closing.swap(true, Ordering::SeqCst) {
            *self.lock_close_started() = Some(now);
        }
        self.log_transition(before);
    }

    /// The render thread stopped on its own (error or panic).
    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn close_started_at(&self) -> Option<Instant> {
        *self.lock_close_started()
    }

    pub(crate) fn close_overdue(&self, now: Instant, deadline: Duration) -> bool {
        self.is_closing()
            && self
                .close_started_at()
                .is_some_and(|started| now.saturating_duration_since(started) > deadline)
    }

    pub(crate) fn attach_thread(&self, handle: JoinHandle<()>) {
        *self.lock_thread() = Some(handle);
    }

    pub(crate) fn take_thread(&self) -> Option<JoinHandle<()>> {
        self.lock_thread().take()
    }

    /// `Some(alive)` while the entry still holds its thread handle.
    pub fn thread_alive(&self) -> Option<bool> {
        self.lock_thread().as_ref().map(|handle| !handle.is_finished())
    }

    pub(crate) fn thread_finished(&self) -> bool {
        self.thread_alive() == Some(false)
    }

    pub(crate) fn bind_owner(&self, owner: ThreadId) {
        let _ = self.owner.set(owner);
    }

    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    pub fn lifecycle(&self) -> PreviewLifecycle {
        if self.is_closing() || !self.is_running() {
            PreviewLifecycle::Closing
        } else if !self.has_controller() {
            PreviewLifecycle::Starting
        } else if self.is_minimized() {
            PreviewLifecycle::Minimized
        } else {
            PreviewLifecycle::Running
        }
    }

    fn log_transition(&self, before: PreviewLifecycle) {
        let after = self.lifecycle();
        if !can_transition(before, after) {
            tracing::warn!(entry = self.id, ?before, ?after, "unexpected preview lifecycle transition");
        } else if before != after {
            tracing::debug!(entry = self.id, ?before, ?after, "preview lifecycle transition");
        }
    }

    fn lock_close_started(&self) -> MutexGuard<'_, Option<Instant>> {
        self.close_started_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The single slot holding the live entry, if any.
#[derive(Debug, Default)]
pub(crate) struct EntryRegistry {
    slot: Mutex<Option<Arc<WindowEntry>>>,
}

impl EntryRegistry {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Arc<WindowEntry>>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn current(&self) -> Option<Arc<WindowEntry>> {
        self.lock().clone()
    }

    /// Removes the entry only if it is still the one identified by `id`; a
    /// late-exiting thread must not evict its successor.
    pub(crate) fn remove_if(&self, id: u64) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|entry| entry.id() == id) {
            slot.take();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::controller::ControllerHandle;

    fn frame() -> PreviewFrame {
        PreviewFrame::solid(1, 1, [0, 0, 0, 255])
    }

    #[test]
    fn none_text_does_not_erase_staged_text() {
        let entry = WindowEntry::new(1, 0, frame(), Some("hello".into()));
        entry.stage_frame(frame(), None);
        entry.stage_frame(frame(), Some(String::new()));
        assert_eq!(entry.mailbox().pending_text.as_deref(), Some("hello"));

        entry.stage_frame(frame(), Some("later".into()));
        assert_eq!(entry.mailbox().pending_text.as_deref(), Some("later"));
    }

    #[test]
    fn registering_controller_flushes_pending_text_once() {
        let entry = WindowEntry::new(1, 0, frame(), Some("hello".into()));
        assert_eq!(entry.lifecycle(), PreviewLifecycle::Starting);

        let handle = ControllerHandle::detached();
        assert_eq!(entry.register_controller(handle.clone()), Some("hello".into()));
        assert_eq!(entry.lifecycle(), PreviewLifecycle::Running);

        entry.stage_frame(frame(), Some("direct".into()));
        assert_eq!(entry.mailbox().pending_text, None);
        assert_eq!(handle.drain().text.as_deref(), Some("direct"));
    }

    #[test]
    fn frame_change_is_detected_by_identity() {
        let first = frame();
        let entry = WindowEntry::new(1, 0, first.clone(), None);
        assert!(entry.frame_if_changed(None).is_some());
        assert!(entry.frame_if_changed(Some(&first)).is_none());

        let second = frame();
        entry.stage_frame(second.clone(), None);
        let seen = entry.frame_if_changed(Some(&first)).expect("new frame");
        assert!(seen.same_frame(&second));
    }

    #[test]
    fn close_request_records_start_once_and_goes_overdue() {
        let entry = WindowEntry::new(1, 0, frame(), None);
        let start = Instant::now();
        entry.request_close(start);
        entry.request_close(start + Duration::from_secs(3));

        assert!(!entry.is_running());
        assert_eq!(entry.close_started_at(), Some(start));
        assert!(!entry.close_overdue(start + Duration::from_secs(5), Duration::from_secs(5)));
        assert!(entry.close_overdue(start + Duration::from_secs(6), Duration::from_secs(5)));
        assert_eq!(entry.lifecycle(), PreviewLifecycle::Closing);
    }

    #[test]
    fn registry_removal_is_guarded_by_entry_id() {
        let registry = EntryRegistry::default();
        *registry.lock() = Some(Arc::new(WindowEntry::new(2, 0, frame(), None)));

        assert!(!registry.remove_if(1));
        assert!(registry.current().is_some());
        assert!(registry.remove_if(2));
        assert!(!registry.remove_if(2));
        assert!(registry.current().is_none());
    }
}
