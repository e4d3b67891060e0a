use std::fmt;

/// Closed set of dispatchable action kinds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ActionKind {
    /// One or more touches at a point.
    Tap,
    /// One or more timed drags between two points.
    Swipe,
    /// One or more key events.
    Key,
    /// A single text injection.
    Text,
}

impl ActionKind {
    /// Lowercase name used in routes, logs and acknowledgments.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::Swipe => "swipe",
            Self::Key => "key",
            Self::Text => "text",
        }
    }

    /// Provisional acknowledgment returned when the deadline elapses first.
    pub fn enqueued_message(self) -> String {
        format!("{} enqueued", self.as_str())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen coordinate as supplied by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Point {
    /// Creates a point.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// How many times to repeat an action and how long to pause between repeats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Repeat {
    /// Number of executions, always at least one.
    pub amount: u32,
    /// Pause in milliseconds between consecutive executions.
    pub delay_ms: u64,
}

impl Repeat {
    /// A single execution with no pause.
    pub const ONCE: Self = Self {
        amount: 1,
        delay_ms: 0,
    };
}

impl Default for Repeat {
    fn default() -> Self {
        Self::ONCE
    }
}

/// Validated tap parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TapCommand {
    /// Touch location.
    pub at: Point,
    /// Repetition policy.
    pub repeat: Repeat,
}

/// Validated swipe parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SwipeCommand {
    /// Start of the drag.
    pub from: Point,
    /// End of the drag.
    pub to: Point,
    /// Drag duration in milliseconds.
    pub duration_ms: u64,
    /// Repetition policy.
    pub repeat: Repeat,
}

/// Validated key parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyCommand {
    /// Numeric or symbolic key code, passed through uninterpreted.
    pub keycode: String,
    /// Repetition policy.
    pub repeat: Repeat,
}

/// Validated text parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextCommand {
    /// Payload to inject, never empty.
    pub payload: String,
}

/// A validated command. Nothing downstream of the parser sees raw text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Tap(TapCommand),
    Swipe(SwipeCommand),
    Key(KeyCommand),
    Text(TextCommand),
}

impl Command {
    /// Kind of this command.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Tap(_) => ActionKind::Tap,
            Self::Swipe(_) => ActionKind::Swipe,
            Self::Key(_) => ActionKind::Key,
            Self::Text(_) => ActionKind::Text,
        }
    }

    /// Repetition policy; text is always injected once.
    pub fn repeat(&self) -> Repeat {
        match self {
            Self::Tap(tap) => tap.repeat,
            Self::Swipe(swipe) => swipe.repeat,
            Self::Key(key) => key.repeat,
            Self::Text(_) => Repeat::ONCE,
        }
    }

    /// Summary reported after every repetition succeeded.
    pub fn success_line(&self) -> String {
        match self {
            Self::Tap(tap) => format!(
                "tapped {} {} {} {}",
                tap.at.x, tap.at.y, tap.repeat.amount, tap.repeat.delay_ms
            ),
            Self::Swipe(swipe) => format!(
                "swiped {} {} {} {} {} {} {}",
                swipe.from.x,
                swipe.from.y,
                swipe.to.x,
                swipe.to.y,
                swipe.duration_ms,
                swipe.repeat.amount,
                swipe.repeat.delay_ms
            ),
            Self::Key(key) => format!(
                "key {} x{} delay={}",
                key.keycode, key.repeat.amount, key.repeat.delay_ms
            ),
            Self::Text(text) => format!("text sent len={}", text.payload.len()),
        }
    }
}
