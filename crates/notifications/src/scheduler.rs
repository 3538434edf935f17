//! Toast admission, expiry and stacking on an explicit timeline.
//!
//! Rules:
//!
//! - Requests wait in an unbounded FIFO backlog. An admission tick
//!   promotes backlog entries while the visible set has room. The first
//!   tick fires at the instant of the first enqueue; later ticks follow at
//!   the admission interval and stop as soon as the backlog is empty.
//! - Only the oldest visible toast with a finite lifetime holds an armed
//!   expiry deadline, set when it becomes that oldest toast. Expiry or
//!   dismissal of the armed toast arms the next one; removing any other
//!   toast leaves the deadline alone.
//! - An expired or dismissed toast fades: it frees its slot at once and is
//!   removed after the fade-out.
//! - Timers due at the same instant run removal, then expiry, then
//!   admission.
//! - Visible toasts stack bottom-up, each offset by the heights of the
//!   toasts below it plus a fixed gap.

use std::collections::VecDeque;

use solasola_core::config::ToastConfig;

use crate::toast::{
    Millis, ToastEvent, ToastId, ToastInstance, ToastRequest, ToastState, DEFAULT_TOAST_HEIGHT_PX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Removal(ToastId),
    Expiry(ToastId),
    Admission,
}

impl Due {
    fn priority(self) -> u8 {
        match self {
            Due::Removal(_) => 0,
            Due::Expiry(_) => 1,
            Due::Admission => 2,
        }
    }
}

#[derive(Debug)]
pub struct ToastScheduler {
    config: ToastConfig,
    next_id: ToastId,
    backlog: VecDeque<ToastInstance>,
    /// Bottom (oldest) first.
    visible: Vec<ToastInstance>,
    /// Fading toasts and their removal deadlines.
    fading: Vec<(ToastId, Millis)>,
    expiry: Option<(ToastId, Millis)>,
    next_admission: Option<Millis>,
    events: Vec<ToastEvent>,
}

impl ToastScheduler {
    pub fn new(config: ToastConfig) -> Self {
        Self {
            config,
            next_id: 1,
            backlog: VecDeque::new(),
            visible: Vec::new(),
            fading: Vec::new(),
            expiry: None,
            next_admission: None,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &ToastConfig {
        &self.config
    }

    /// Queue a toast and process everything due at `now`.
    pub fn enqueue(&mut self, request: ToastRequest, now: Millis) -> ToastId {
        let id = self.next_id;
        self.next_id += 1;

        self.backlog.push_back(ToastInstance {
            id,
            message: request.message,
            severity: request.severity,
            icon: request.icon,
            duration_ms: request.duration_ms.unwrap_or(self.config.default_duration_ms),
            state: ToastState::Queued,
            offset_px: 0.0,
            height_px: DEFAULT_TOAST_HEIGHT_PX,
            reveal_delay_ms: 0,
            admitted_at: None,
        });

        if self.next_admission.is_none() {
            self.next_admission = Some(now);
        }
        self.advance(now);
        id
    }

    /// Run every timer due at or before `now`, in timeline order.
    pub fn advance(&mut self, now: Millis) {
        while let Some((at, due)) = self.next_due() {
            if at > now {
                break;
            }
            match due {
                Due::Removal(id) => self.remove_faded(id),
                Due::Expiry(id) => self.expire(id, at),
                Due::Admission => self.admit(at),
            }
        }
    }

    /// Dismiss a queued or visible toast. Returns `false` if unknown.
    pub fn dismiss(&mut self, id: ToastId, now: Millis) -> bool {
        self.advance(now);

        if let Some(pos) = self.backlog.iter().position(|t| t.id == id) {
            self.backlog.remove(pos);
            self.events.push(ToastEvent::Removed { id });
            if self.backlog.is_empty() {
                self.next_admission = None;
            }
            return true;
        }

        let was_armed = matches!(self.expiry, Some((armed, _)) if armed == id);
        if !self.start_fading(id, now) {
            return false;
        }
        if was_armed {
            self.expiry = None;
            self.arm_expiry(now);
        }
        true
    }

    /// Drop everything and stop all timers.
    pub fn clear_all(&mut self) {
        self.backlog.clear();
        self.visible.clear();
        self.fading.clear();
        self.expiry = None;
        self.next_admission = None;
        self.events.push(ToastEvent::Cleared);
    }

    /// Record the height a renderer measured and restack.
    pub fn set_rendered_height(&mut self, id: ToastId, height_px: f64) {
        if let Some(toast) = self.visible.iter_mut().find(|t| t.id == id) {
            toast.height_px = height_px.max(0.0);
            self.restack();
        }
    }

    /// Earliest pending timer, if any timer is running.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.next_due().map(|(at, _)| at)
    }

    pub fn drain_events(&mut self) -> Vec<ToastEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn visible(&self) -> &[ToastInstance] {
        &self.visible
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn fading_len(&self) -> usize {
        self.fading.len()
    }

    pub fn admission_timer_running(&self) -> bool {
        self.next_admission.is_some()
    }

    /// The toast whose expiry deadline is armed, with the deadline.
    pub fn armed_expiry(&self) -> Option<(ToastId, Millis)> {
        self.expiry
    }

    // ---- private helpers ----

    fn next_due(&self) -> Option<(Millis, Due)> {
        let removals = self.fading.iter().map(|(id, at)| (*at, Due::Removal(*id)));
        let expiry = self.expiry.map(|(id, at)| (at, Due::Expiry(id)));
        let admission = self.next_admission.map(|at| (at, Due::Admission));

        removals
            .chain(expiry)
            .chain(admission)
            .min_by_key(|(at, due)| (*at, due.priority()))
    }

    fn admit(&mut self, at: Millis) {
        let mut batch: u64 = 0;
        while self.visible.len() < self.config.max_visible {
            let Some(mut toast) = self.backlog.pop_front() else {
                break;
            };
            toast.state = ToastState::Visible;
            toast.admitted_at = Some(at);
            toast.offset_px = self.stack_height();
            toast.reveal_delay_ms = batch * self.config.reveal_stagger_ms;
            tracing::trace!(toast_id = toast.id, at, "Toast admitted");
            self.events.push(ToastEvent::Shown {
                toast: toast.clone(),
            });
            self.visible.push(toast);
            batch += 1;
        }

        self.arm_expiry(at);
        self.next_admission = if self.backlog.is_empty() {
            None
        } else {
            Some(at + self.config.admission_interval_ms)
        };
    }

    fn expire(&mut self, id: ToastId, at: Millis) {
        self.expiry = None;
        self.start_fading(id, at);
        self.arm_expiry(at);
    }

    fn arm_expiry(&mut self, at: Millis) {
        if self.expiry.is_some() {
            return;
        }
        self.expiry = self
            .visible
            .iter()
            .find(|t| !t.is_persistent())
            .map(|t| (t.id, at + t.duration_ms));
    }

    fn start_fading(&mut self, id: ToastId, at: Millis) -> bool {
        let Some(pos) = self.visible.iter().position(|t| t.id == id) else {
            return false;
        };
        self.visible.remove(pos);
        self.fading.push((id, at + self.config.fade_out_ms));
        self.events.push(ToastEvent::Fading { id, at });
        self.restack();
        true
    }

    fn remove_faded(&mut self, id: ToastId) {
        self.fading.retain(|(fading_id, _)| *fading_id != id);
        self.events.push(ToastEvent::Removed { id });
    }

    fn stack_height(&self) -> f64 {
        self.visible
            .iter()
            .map(|t| t.height_px + self.config.stack_gap_px)
            .sum()
    }

    fn restack(&mut self) {
        let mut offset = 0.0;
        for (index, toast) in self.visible.iter_mut().enumerate() {
            if (toast.offset_px - offset).abs() > f64::EPSILON {
                toast.offset_px = offset;
                toast.reveal_delay_ms = index as u64 * self.config.reveal_stagger_ms;
                self.events.push(ToastEvent::Moved {
                    id: toast.id,
                    offset_px: offset,
                    reveal_delay_ms: toast.reveal_delay_ms,
                });
            }
            offset += toast.height_px + self.config.stack_gap_px;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solasola_core::task::Severity;

    fn scheduler() -> ToastScheduler {
        ToastScheduler::new(ToastConfig::default())
    }

    fn toast(msg: &str, duration_ms: u64) -> ToastRequest {
        ToastRequest::new(msg, Severity::Info).with_duration(duration_ms)
    }

    fn shown(events: &[ToastEvent]) -> Vec<(ToastId, Millis)> {
        events
            .iter()
            .filter_map(|e| match e {
                ToastEvent::Shown { toast } => Some((toast.id, toast.admitted_at.unwrap_or_default())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn seven_toasts_cascade_as_slots_free() {
        let mut s = scheduler();
        for i in 1..=7 {
            s.enqueue(toast(&format!("t{i}"), 1000), 0);
        }
        let events = s.drain_events();
        assert_eq!(shown(&events), vec![(1, 0), (2, 0), (3, 0), (4, 0), (5, 0)]);
        assert_eq!(s.backlog_len(), 2);

        s.advance(999);
        assert!(shown(&s.drain_events()).is_empty());

        s.advance(1000);
        assert_eq!(shown(&s.drain_events()), vec![(6, 1000)]);

        s.advance(2000);
        assert_eq!(shown(&s.drain_events()), vec![(7, 2000)]);
        assert!(!s.admission_timer_running());
    }

    #[test]
    fn seven_default_toasts_admit_at_one_and_two_seconds() {
        let mut s = scheduler();
        for i in 1..=7 {
            s.enqueue(ToastRequest::new(format!("t{i}"), Severity::Info), 0);
        }
        s.drain_events();

        let mut admitted = Vec::new();
        let mut now = 0;
        while now <= 20_000 {
            now += 100;
            s.advance(now);
            admitted.extend(
                shown(&s.drain_events())
                    .into_iter()
                    .filter(|(id, _)| *id > 5),
            );
        }
        assert_eq!(admitted, vec![(6, 1000), (7, 2000)]);
    }

    #[test]
    fn never_more_than_cap_visible_and_fifo() {
        let mut s = scheduler();
        let mut order = Vec::new();
        for i in 0..20u64 {
            s.enqueue(toast("x", 300 + (i % 4) * 200), i * 50);
            assert!(s.visible().len() <= 5);
            order.extend(shown(&s.drain_events()).into_iter().map(|(id, _)| id));
        }
        let mut now = 1000;
        while s.next_deadline().is_some() {
            now += 100;
            s.advance(now);
            assert!(s.visible().len() <= 5);
            order.extend(shown(&s.drain_events()).into_iter().map(|(id, _)| id));
        }
        assert_eq!(order, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn persistent_toast_never_expires() {
        let mut s = scheduler();
        let id = s.enqueue(toast("stay", 0), 0);
        assert_eq!(s.next_deadline(), None);

        s.advance(10_000_000);
        assert_eq!(s.visible().len(), 1);

        assert!(s.dismiss(id, 10_000_001));
        assert!(s.visible().is_empty());
    }

    #[test]
    fn admission_timer_stops_when_backlog_empty() {
        let mut s = scheduler();
        s.enqueue(toast("a", 5000), 0);
        assert!(!s.admission_timer_running());
        assert_eq!(s.next_deadline(), Some(5000));
    }

    #[test]
    fn only_oldest_finite_toast_is_armed() {
        let mut s = scheduler();
        let a = s.enqueue(toast("a", 1000), 0);
        let b = s.enqueue(toast("b", 500), 0);
        assert_eq!(s.armed_expiry(), Some((a, 1000)));

        s.advance(600);
        assert_eq!(s.visible().len(), 2);

        s.advance(1000);
        assert_eq!(s.armed_expiry(), Some((b, 1500)));
    }

    #[test]
    fn persistent_bottom_toast_is_skipped_when_arming() {
        let mut s = scheduler();
        s.enqueue(toast("pinned", 0), 0);
        let b = s.enqueue(toast("b", 800), 0);
        assert_eq!(s.armed_expiry(), Some((b, 800)));
    }

    #[test]
    fn dismissing_non_bottom_keeps_timer() {
        let mut s = scheduler();
        let a = s.enqueue(toast("a", 1000), 0);
        let b = s.enqueue(toast("b", 1000), 0);
        s.enqueue(toast("c", 1000), 0);

        assert!(s.dismiss(b, 400));
        assert_eq!(s.armed_expiry(), Some((a, 1000)));
    }

    #[test]
    fn dismissing_bottom_rearms_next() {
        let mut s = scheduler();
        let a = s.enqueue(toast("a", 1000), 0);
        let b = s.enqueue(toast("b", 1000), 0);

        assert!(s.dismiss(a, 400));
        assert_eq!(s.armed_expiry(), Some((b, 1400)));
        assert!(!s.dismiss(a, 401));
    }

    #[test]
    fn stack_offsets_follow_heights_and_gap() {
        let mut s = scheduler();
        let a = s.enqueue(toast("a", 1000), 0);
        let b = s.enqueue(toast("b", 1000), 0);
        let c = s.enqueue(toast("c", 1000), 0);
        s.set_rendered_height(a, 40.0);
        s.set_rendered_height(b, 60.0);
        s.drain_events();

        let offsets: Vec<f64> = s.visible().iter().map(|t| t.offset_px).collect();
        assert_eq!(offsets, vec![0.0, 50.0, 120.0]);

        s.advance(1000);
        let events = s.drain_events();
        assert!(events.contains(&ToastEvent::Fading { id: a, at: 1000 }));
        assert!(events.contains(&ToastEvent::Moved {
            id: b,
            offset_px: 0.0,
            reveal_delay_ms: 0
        }));
        assert!(events.contains(&ToastEvent::Moved {
            id: c,
            offset_px: 70.0,
            reveal_delay_ms: 100
        }));
    }

    #[test]
    fn simultaneous_admissions_are_staggered() {
        let mut s = scheduler();
        let pinned: Vec<ToastId> = (0..5).map(|_| s.enqueue(toast("pinned", 0), 0)).collect();
        for _ in 0..3 {
            s.enqueue(toast("x", 1000), 0);
        }
        for id in &pinned[..3] {
            assert!(s.dismiss(*id, 10));
        }
        s.drain_events();

        s.advance(1000);
        let delays: Vec<u64> = s
            .drain_events()
            .iter()
            .filter_map(|e| match e {
                ToastEvent::Shown { toast } => Some(toast.reveal_delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![0, 100, 200]);
        assert_eq!(s.visible().len(), 5);
    }

    #[test]
    fn faded_toast_is_removed_after_fade_out() {
        let mut s = scheduler();
        let a = s.enqueue(toast("a", 1000), 0);
        s.advance(1000);
        assert_eq!(s.fading_len(), 1);
        assert_eq!(s.next_deadline(), Some(1300));

        s.advance(1300);
        assert!(s.drain_events().contains(&ToastEvent::Removed { id: a }));
        assert_eq!(s.fading_len(), 0);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn dismissing_queued_toast_removes_it_silently() {
        let mut s = scheduler();
        for _ in 0..5 {
            s.enqueue(toast("x", 1000), 0);
        }
        let queued = s.enqueue(toast("late", 1000), 0);
        assert!(s.admission_timer_running());

        assert!(s.dismiss(queued, 10));
        assert_eq!(s.backlog_len(), 0);
        assert!(!s.admission_timer_running());
    }

    #[test]
    fn clear_all_empties_and_stops_timers() {
        let mut s = scheduler();
        for _ in 0..8 {
            s.enqueue(toast("x", 1000), 0);
        }
        s.clear_all();

        assert!(s.visible().is_empty());
        assert_eq!(s.backlog_len(), 0);
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.drain_events().last(), Some(&ToastEvent::Cleared));
    }
}
