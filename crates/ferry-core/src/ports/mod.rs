//! Ports - 抽象化レイヤー
//!
//! キューが外部に依存する部分（時刻、ID 生成、イベント通知）を trait にして、
//! テストで差し替えられるようにしています。

pub mod clock;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
