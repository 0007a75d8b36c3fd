use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::view::{ChatView, Effect, ViewEvent, HIGHLIGHT_TTL, TYPING_TTL};
use crate::error::AppResult;
use crate::store::{Message, MessageStore, DEEP_LINK_WINDOW_MINUTES};

/// History fetches the engine needs: cursor pages and deep-link windows.
/// The server exposes these as `GET /r/{room}/messages` and the socket's
/// `findById`; tests drive the store directly.
pub trait HistoryApi: Send + Sync + 'static {
    fn page(
        &self,
        room: &str,
        before: Option<i64>,
        limit: u32,
    ) -> impl Future<Output = AppResult<Vec<Message>>> + Send;

    fn window(&self, id: Uuid) -> impl Future<Output = AppResult<Vec<Message>>> + Send;
}

impl HistoryApi for MessageStore {
    async fn page(&self, room: &str, before: Option<i64>, limit: u32) -> AppResult<Vec<Message>> {
        self.query(room, before, limit).await
    }

    async fn window(&self, id: Uuid) -> AppResult<Vec<Message>> {
        self.find_window(id, DEEP_LINK_WINDOW_MINUTES).await
    }
}

pub struct ViewHandle {
    /// Feed transport pushes, scroll reports and user intents here.
    pub events: mpsc::Sender<ViewEvent>,
    /// Render-facing effects: scroll plans, highlights, reconnect banner.
    pub effects: mpsc::Receiver<Effect>,
    /// Resolves to the final view state once the event channel closes.
    pub task: JoinHandle<ChatView>,
}

/// Runs one room view on its own task. Every buffer mutation flows through
/// the single event queue, so a page merge can never race a live push or a
/// deep-link window; fetches are awaited in-line, which is also what holds
/// the one-in-flight pagination guarantee.
pub fn spawn_view<A: HistoryApi>(mut view: ChatView, api: A) -> ViewHandle {
    let (event_tx, mut event_rx) = mpsc::channel::<ViewEvent>(64);
    let (effect_tx, effect_rx) = mpsc::channel::<Effect>(64);
    // weak, so the driver holding its own sender does not keep the queue
    // alive after the outside world hangs up
    let timer_tx = event_tx.downgrade();

    let task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let mut pending = VecDeque::from([event]);
            while let Some(event) = pending.pop_front() {
                for effect in view.apply(event) {
                    match effect {
                        Effect::FetchLatest { limit } => {
                            match api.page(view.room(), None, limit).await {
                                Ok(page) => pending.push_back(ViewEvent::LatestPage(page)),
                                Err(err) => {
                                    tracing::warn!(room = view.room(), "initial load failed: {err}");
                                    pending.push_back(ViewEvent::FetchFailed);
                                }
                            }
                        }
                        Effect::FetchOlder { before, limit } => {
                            match api.page(view.room(), Some(before), limit).await {
                                Ok(page) => pending.push_back(ViewEvent::OlderPage(page)),
                                Err(err) => {
                                    tracing::warn!(room = view.room(), "pagination failed: {err}");
                                    pending.push_back(ViewEvent::FetchFailed);
                                }
                            }
                        }
                        Effect::FetchWindow { id } => match api.window(id).await {
                            Ok(window) => pending.push_back(ViewEvent::Window(window)),
                            Err(err) => {
                                tracing::warn!(room = view.room(), %id, "window fetch failed: {err}");
                                pending.push_back(ViewEvent::FetchFailed);
                            }
                        },
                        Effect::ScheduleTypingClear { generation } => {
                            schedule(&timer_tx, TYPING_TTL, ViewEvent::TypingElapsed { generation });
                        }
                        Effect::ScheduleHighlightClear { generation } => {
                            schedule(&timer_tx, HIGHLIGHT_TTL, ViewEvent::HighlightElapsed { generation });
                        }
                        render => {
                            if effect_tx.send(render).await.is_err() {
                                return view;
                            }
                        }
                    }
                }
            }
        }
        view
    });

    ViewHandle { events: event_tx, effects: effect_rx, task }
}

fn schedule(timer_tx: &mpsc::WeakSender<ViewEvent>, after: std::time::Duration, event: ViewEvent) {
    let Some(tx) = timer_tx.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = tx.send(event).await;
    });
}
