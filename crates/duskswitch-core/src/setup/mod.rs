// ── Guided permission setup ──
//
// `machine` holds the pure transition rules, `countdown` the cancellable
// auto-advance timer, `completion` the once-only completion transaction and
// `flow` the task that wires them to the monitor and the elevation channel.

pub mod completion;
pub mod countdown;
pub mod flow;
pub mod machine;

pub use completion::CompletionTransaction;
pub use countdown::{Countdown, CountdownEvent};
pub use flow::{ActionReply, SetupAction, SetupFlow, SetupHandle};
pub use machine::{Effect, SetupMachine};
