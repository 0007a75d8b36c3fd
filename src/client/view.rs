use std::time::Duration;

use uuid::Uuid;

use crate::client::buffer::MessageBuffer;
use crate::store::Message;

/// Viewport pixels from the top edge under which backward pagination kicks in.
const NEAR_TOP_PX: f64 = 80.0;
/// Slack under the bottom edge within which the view still counts as pinned.
const BOTTOM_SLACK_PX: f64 = 4.0;

pub const TYPING_TTL: Duration = Duration::from_secs(3);
pub const HIGHLIGHT_TTL: Duration = Duration::from_secs(2);

/// Scalar snapshot of the scroll viewport, reported by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn at_bottom(&self) -> bool {
        self.scroll_top + self.viewport_height >= self.content_height - BOTTOM_SLACK_PX
    }

    pub fn near_top(&self) -> bool {
        self.scroll_top < NEAR_TOP_PX
    }
}

/// Scroll-anchoring arithmetic for a prepend: with the pre-prepend metrics
/// and the content height after the DOM updated, the returned offset keeps
/// the previously visible content where it was.
pub fn anchored_scroll_top(before: &ScrollMetrics, new_content_height: f64) -> f64 {
    before.scroll_top + (new_content_height - before.content_height)
}

/// Inputs to the engine. Everything that can mutate the buffer arrives here
/// and nowhere else, through one serialized queue per room view.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The view is on screen; kicks off the initial load.
    Opened,
    LatestPage(Vec<Message>),
    OlderPage(Vec<Message>),
    /// Deep-link window fetch result.
    Window(Vec<Message>),
    /// A fetch never completed; clears the in-flight guard so pagination can
    /// retry instead of jamming.
    FetchFailed,
    Live(Message),
    Removed(Uuid),
    /// The server confirmed our own delete request.
    DeleteConfirmed(Uuid),
    Typing { display_name: String },
    TypingElapsed { generation: u64 },
    HighlightElapsed { generation: u64 },
    Scrolled(ScrollMetrics),
    JumpToLatest,
    ConnectionLost,
    ConnectionRestored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollPlan {
    /// Pin the viewport to the newest message.
    Bottom,
    /// Content was prepended; restore the anchored offset
    /// (`anchored_scroll_top`).
    PreserveAnchor,
    /// Bring one message into view.
    ToMessage(Uuid),
}

/// Outputs of the engine: fetches for the driver, everything else for the
/// rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchLatest { limit: u32 },
    FetchOlder { before: i64, limit: u32 },
    FetchWindow { id: Uuid },
    Scroll(ScrollPlan),
    Highlight { id: Uuid, generation: u64 },
    ScheduleHighlightClear { generation: u64 },
    ScheduleTypingClear { generation: u64 },
    SetReconnecting(bool),
}

/// The synchronization engine for one room view: sole owner of the message
/// buffer, arbitrating page fetches, deep-link windows and live pushes.
#[derive(Debug)]
pub struct ChatView {
    room: String,
    buffer: MessageBuffer,
    page_size: u32,
    has_more_history: bool,
    loading_older: bool,
    at_bottom: bool,
    unread_count: u32,
    typing: Option<String>,
    typing_generation: u64,
    deep_link: Option<Uuid>,
    highlight: Option<Uuid>,
    highlight_generation: u64,
    reconnecting: bool,
}

impl ChatView {
    pub fn new(room: impl Into<String>, page_size: u32) -> Self {
        Self {
            room: room.into(),
            buffer: MessageBuffer::new(),
            page_size,
            has_more_history: true,
            loading_older: false,
            at_bottom: false,
            unread_count: 0,
            typing: None,
            typing_generation: 0,
            deep_link: None,
            highlight: None,
            highlight_generation: 0,
            reconnecting: false,
        }
    }

    /// A view opened from a deep link: the initial load skips the bottom
    /// scroll and resolves the target instead.
    pub fn with_deep_link(room: impl Into<String>, page_size: u32, target: Uuid) -> Self {
        let mut view = Self::new(room, page_size);
        view.deep_link = Some(target);
        view
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn messages(&self) -> &[Message] {
        self.buffer.messages()
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    pub fn at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more_history
    }

    pub fn typing(&self) -> Option<&str> {
        self.typing.as_deref()
    }

    pub fn highlighted(&self) -> Option<Uuid> {
        self.highlight
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// The "jump to latest" affordance shows whenever unread messages piled
    /// up below the viewport.
    pub fn show_jump_to_latest(&self) -> bool {
        self.unread_count > 0 && !self.at_bottom
    }

    pub fn apply(&mut self, event: ViewEvent) -> Vec<Effect> {
        match event {
            ViewEvent::Opened => vec![Effect::FetchLatest { limit: self.page_size }],

            ViewEvent::LatestPage(page) => {
                self.has_more_history = page.len() as u32 >= self.page_size;
                self.buffer.merge(page);
                match self.deep_link {
                    Some(target) if self.buffer.contains(target) => {
                        self.deep_link = None;
                        self.focus_target(target)
                    }
                    Some(target) => vec![Effect::FetchWindow { id: target }],
                    None => {
                        self.at_bottom = true;
                        vec![Effect::Scroll(ScrollPlan::Bottom)]
                    }
                }
            }

            ViewEvent::OlderPage(page) => {
                self.loading_older = false;
                if (page.len() as u32) < self.page_size {
                    self.has_more_history = false;
                }
                let inserted = self.buffer.merge(page);
                if inserted > 0 {
                    vec![Effect::Scroll(ScrollPlan::PreserveAnchor)]
                } else {
                    vec![]
                }
            }

            ViewEvent::Window(window) => {
                self.buffer.merge(window);
                match self.deep_link.take() {
                    Some(target) if self.buffer.contains(target) => self.focus_target(target),
                    _ => vec![],
                }
            }

            ViewEvent::FetchFailed => {
                self.loading_older = false;
                self.reconnecting = true;
                vec![Effect::SetReconnecting(true)]
            }

            ViewEvent::Live(msg) => {
                if msg.room_id != self.room || !self.buffer.insert(msg) {
                    return vec![];
                }
                if self.at_bottom {
                    vec![Effect::Scroll(ScrollPlan::Bottom)]
                } else {
                    self.unread_count += 1;
                    vec![]
                }
            }

            ViewEvent::Removed(id) | ViewEvent::DeleteConfirmed(id) => {
                self.buffer.remove(id);
                vec![]
            }

            ViewEvent::Typing { display_name } => {
                // last sender wins; an older clear timer is outdated by the
                // generation bump
                self.typing = Some(display_name);
                self.typing_generation += 1;
                vec![Effect::ScheduleTypingClear { generation: self.typing_generation }]
            }

            ViewEvent::TypingElapsed { generation } => {
                if generation == self.typing_generation {
                    self.typing = None;
                }
                vec![]
            }

            ViewEvent::HighlightElapsed { generation } => {
                if generation == self.highlight_generation {
                    self.highlight = None;
                }
                vec![]
            }

            ViewEvent::Scrolled(metrics) => {
                self.at_bottom = metrics.at_bottom();
                if self.at_bottom {
                    self.unread_count = 0;
                }

                let oldest = self.buffer.oldest().map(|m| m.created_at);
                match oldest {
                    Some(before)
                        if metrics.near_top() && self.has_more_history && !self.loading_older =>
                    {
                        self.loading_older = true;
                        vec![Effect::FetchOlder { before, limit: self.page_size }]
                    }
                    _ => vec![],
                }
            }

            ViewEvent::JumpToLatest => {
                self.at_bottom = true;
                self.unread_count = 0;
                vec![Effect::Scroll(ScrollPlan::Bottom)]
            }

            ViewEvent::ConnectionLost => {
                self.reconnecting = true;
                vec![Effect::SetReconnecting(true)]
            }

            ViewEvent::ConnectionRestored => {
                self.reconnecting = false;
                vec![Effect::SetReconnecting(false)]
            }
        }
    }

    fn focus_target(&mut self, target: Uuid) -> Vec<Effect> {
        self.highlight = Some(target);
        self.highlight_generation += 1;
        vec![
            Effect::Scroll(ScrollPlan::ToMessage(target)),
            Effect::Highlight { id: target, generation: self.highlight_generation },
            Effect::ScheduleHighlightClear { generation: self.highlight_generation },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageKind;

    const PAGE: u32 = 30;

    fn msg_in(room: &str, n: u128, at: i64) -> Message {
        Message {
            id: Uuid::from_u128(n),
            room_id: room.to_owned(),
            sender_stable_id: None,
            sender_display_name: "Guest-42".to_owned(),
            sender_avatar_url: None,
            kind: MessageKind::Text,
            text: Some(format!("m{n}")),
            media_url: None,
            media_kind: None,
            is_guest: true,
            created_at: at,
        }
    }

    fn msg(n: u128, at: i64) -> Message {
        msg_in("guppy-general", n, at)
    }

    fn bottom_metrics() -> ScrollMetrics {
        ScrollMetrics { scroll_top: 600.0, viewport_height: 400.0, content_height: 1000.0 }
    }

    fn top_metrics() -> ScrollMetrics {
        ScrollMetrics { scroll_top: 10.0, viewport_height: 400.0, content_height: 1000.0 }
    }

    fn scrolled_away_metrics() -> ScrollMetrics {
        ScrollMetrics { scroll_top: 300.0, viewport_height: 400.0, content_height: 1000.0 }
    }

    #[test]
    fn initial_load_fetches_then_scrolls_to_bottom() {
        let mut view = ChatView::new("guppy-general", PAGE);
        assert_eq!(view.apply(ViewEvent::Opened), vec![Effect::FetchLatest { limit: PAGE }]);

        let effects = view.apply(ViewEvent::LatestPage((0..5).map(|i| msg(i, i as i64 * 10)).collect()));
        assert_eq!(effects, vec![Effect::Scroll(ScrollPlan::Bottom)]);
        assert!(view.at_bottom());
        assert!(!view.has_more_history(), "a short first page means no older history");
    }

    #[test]
    fn pagination_scenario_40_messages() {
        // 40 stored messages: initial load returns the newest 30 ascending,
        // one older fetch returns the remaining 10 and ends history
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);

        let newest30: Vec<Message> = (10..40).map(|i| msg(i, i as i64 * 10)).collect();
        view.apply(ViewEvent::LatestPage(newest30));
        assert!(view.has_more_history());

        let effects = view.apply(ViewEvent::Scrolled(top_metrics()));
        assert_eq!(effects, vec![Effect::FetchOlder { before: 100, limit: PAGE }]);

        // the guard suppresses a second trigger while the fetch is in flight
        assert_eq!(view.apply(ViewEvent::Scrolled(top_metrics())), vec![]);

        let oldest10: Vec<Message> = (0..10).map(|i| msg(i, i as i64 * 10)).collect();
        let effects = view.apply(ViewEvent::OlderPage(oldest10));
        assert_eq!(effects, vec![Effect::Scroll(ScrollPlan::PreserveAnchor)]);
        assert!(!view.has_more_history());

        assert_eq!(view.messages().len(), 40);
        assert!(view
            .messages()
            .windows(2)
            .all(|w| w[0].created_at < w[1].created_at));

        // exhausted history never refetches
        assert_eq!(view.apply(ViewEvent::Scrolled(top_metrics())), vec![]);
    }

    #[test]
    fn unread_scenario_five_sends_while_scrolled_away() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage(vec![msg(0, 10)]));
        view.apply(ViewEvent::Scrolled(scrolled_away_metrics()));
        assert!(!view.at_bottom());

        for i in 1..=5 {
            let effects = view.apply(ViewEvent::Live(msg(i, 100 + i as i64)));
            assert!(effects.is_empty(), "no auto-scroll while scrolled away");
        }
        assert_eq!(view.unread_count(), 5);
        assert!(view.show_jump_to_latest());

        view.apply(ViewEvent::Scrolled(bottom_metrics()));
        assert_eq!(view.unread_count(), 0);
        assert!(!view.show_jump_to_latest());
    }

    #[test]
    fn live_append_at_bottom_sticks_to_bottom() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage(vec![msg(0, 10)]));

        let effects = view.apply(ViewEvent::Live(msg(1, 20)));
        assert_eq!(effects, vec![Effect::Scroll(ScrollPlan::Bottom)]);
        assert_eq!(view.unread_count(), 0);
    }

    #[test]
    fn live_echo_of_own_send_is_deduplicated() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage(vec![]));

        view.apply(ViewEvent::Live(msg(1, 20)));
        view.apply(ViewEvent::Live(msg(1, 20)));
        assert_eq!(view.messages().len(), 1, "exactly one copy after the round trip");
    }

    #[test]
    fn live_messages_for_other_rooms_are_ignored() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage(vec![]));

        view.apply(ViewEvent::Live(msg_in("betta-general", 1, 20)));
        assert!(view.messages().is_empty());
    }

    #[test]
    fn removed_filter_is_idempotent() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage(vec![msg(0, 10), msg(1, 20)]));

        view.apply(ViewEvent::Removed(Uuid::from_u128(1)));
        let once: Vec<Uuid> = view.messages().iter().map(|m| m.id).collect();
        view.apply(ViewEvent::Removed(Uuid::from_u128(1)));
        let twice: Vec<Uuid> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(once, twice);

        view.apply(ViewEvent::DeleteConfirmed(Uuid::from_u128(0)));
        assert!(view.messages().is_empty());
    }

    #[test]
    fn deep_link_skips_bottom_scroll_and_resolves_a_window() {
        let target = Uuid::from_u128(99);
        let mut view = ChatView::with_deep_link("guppy-general", PAGE, target);
        view.apply(ViewEvent::Opened);

        // target is outside the newest page: no bottom scroll, window fetch
        let page: Vec<Message> = (0..PAGE as u128).map(|i| msg(i + 200, 2000 + i as i64)).collect();
        let effects = view.apply(ViewEvent::LatestPage(page));
        assert_eq!(effects, vec![Effect::FetchWindow { id: target }]);
        assert!(!view.at_bottom());

        let window: Vec<Message> = vec![msg(98, 900), msg(99, 910), msg(100, 920)];
        let effects = view.apply(ViewEvent::Window(window));
        assert_eq!(effects[0], Effect::Scroll(ScrollPlan::ToMessage(target)));
        assert!(matches!(effects[1], Effect::Highlight { id, .. } if id == target));
        assert_eq!(view.highlighted(), Some(target));

        // merged window keeps global order
        assert!(view
            .messages()
            .windows(2)
            .all(|w| w[0].created_at < w[1].created_at));

        // stale clear is a no-op only when generations differ
        view.apply(ViewEvent::HighlightElapsed { generation: 0 });
        assert_eq!(view.highlighted(), Some(target));
        view.apply(ViewEvent::HighlightElapsed { generation: 1 });
        assert_eq!(view.highlighted(), None);
    }

    #[test]
    fn deep_link_already_in_first_page_highlights_without_window_fetch() {
        let target = Uuid::from_u128(3);
        let mut view = ChatView::with_deep_link("guppy-general", PAGE, target);
        view.apply(ViewEvent::Opened);

        let effects = view.apply(ViewEvent::LatestPage((0..5).map(|i| msg(i, i as i64 * 10)).collect()));
        assert_eq!(effects[0], Effect::Scroll(ScrollPlan::ToMessage(target)));
        assert!(effects.iter().all(|e| !matches!(e, Effect::FetchWindow { .. })));
    }

    #[test]
    fn typing_is_last_sender_wins_with_stale_clears_ignored() {
        let mut view = ChatView::new("guppy-general", PAGE);

        let effects = view.apply(ViewEvent::Typing { display_name: "Ariel".to_owned() });
        assert_eq!(effects, vec![Effect::ScheduleTypingClear { generation: 1 }]);
        view.apply(ViewEvent::Typing { display_name: "Guest-42".to_owned() });
        assert_eq!(view.typing(), Some("Guest-42"));

        // the first sender's timer fires late; the newer indicator survives
        view.apply(ViewEvent::TypingElapsed { generation: 1 });
        assert_eq!(view.typing(), Some("Guest-42"));
        view.apply(ViewEvent::TypingElapsed { generation: 2 });
        assert_eq!(view.typing(), None);
    }

    #[test]
    fn fetch_failure_releases_the_pagination_guard() {
        let mut view = ChatView::new("guppy-general", PAGE);
        view.apply(ViewEvent::Opened);
        view.apply(ViewEvent::LatestPage((0..PAGE as u128).map(|i| msg(i, i as i64 * 10)).collect()));

        assert!(!view.apply(ViewEvent::Scrolled(top_metrics())).is_empty());
        let effects = view.apply(ViewEvent::FetchFailed);
        assert_eq!(effects, vec![Effect::SetReconnecting(true)]);
        assert!(view.is_reconnecting());

        // guard released: the next near-top scroll may retry
        assert!(!view.apply(ViewEvent::Scrolled(top_metrics())).is_empty());

        view.apply(ViewEvent::ConnectionRestored);
        assert!(!view.is_reconnecting());
    }

    #[test]
    fn anchored_scroll_math_offsets_by_the_height_delta() {
        let before = ScrollMetrics { scroll_top: 50.0, viewport_height: 400.0, content_height: 1000.0 };
        assert_eq!(anchored_scroll_top(&before, 1400.0), 450.0);
        assert_eq!(anchored_scroll_top(&before, 1000.0), 50.0);
    }
}
