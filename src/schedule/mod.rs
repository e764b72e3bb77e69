//! Alarm, timer and reminder scheduling
//!
//! Leaves first: [`rules`] holds the pure recurrence arithmetic, [`parse`]
//! the spoken and written vocabulary, and [`store`] the single owner of all
//! schedule entities, advanced by the [`ticker`].

mod clock;
mod model;
pub mod parse;
pub mod rules;
mod store;
mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{
    AlarmDetail, CalendarEvent, CalendarTrigger, EventDetail, EventKind, EventPatch, NewEvent,
    Playback, ReminderDetail, ReminderSchedule, ScheduleEvent, Snapshot, TimerDetail,
};
pub use rules::{RecurrenceRule, SkipPolicy, next_fire, next_fire_skipping};
pub use store::{CalendarMerge, ScheduleStore, StoreEvent, StoreSettings};
pub use ticker::spawn_ticker;
