//! Client-side synchronization engine: keeps the rendered message buffer of
//! one room consistent under pagination, deep links, live pushes and
//! deletions. The reducer in `view` decides, the `task` driver performs
//! fetches and timers, and the rendering layer interprets effects.

mod buffer;
mod task;
mod view;

pub use buffer::MessageBuffer;
pub use task::{spawn_view, HistoryApi, ViewHandle};
pub use view::{
    anchored_scroll_top, ChatView, Effect, ScrollMetrics, ScrollPlan, ViewEvent, HIGHLIGHT_TTL,
    TYPING_TTL,
};
