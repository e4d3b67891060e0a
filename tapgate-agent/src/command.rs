//! Validation of raw command bodies into typed [`Command`] values.
//!
//! Every parser works on whitespace separated tokens of the trimmed body.
//! Optional trailing `<amount> <delay>` pairs default to one execution with
//! no pause. Text bodies are taken verbatim.

use crate::error::CommandError;
use crate::model::{
    ActionKind, Command, KeyCommand, Point, Repeat, SwipeCommand, TapCommand, TextCommand,
};

const TAP_USAGE: &str = "<x> <y> [amount] [delay]";
const SWIPE_USAGE: &str = "<x1> <y1> <x2> <y2> <duration> [amount] [delay]";
const KEY_USAGE: &str = "<keycode> [amount] [delay]";

/// Parses a request body for the given action kind.
pub fn parse(kind: ActionKind, body: &str) -> Result<Command, CommandError> {
    match kind {
        ActionKind::Tap => parse_tap(body).map(Command::Tap),
        ActionKind::Swipe => parse_swipe(body).map(Command::Swipe),
        ActionKind::Key => parse_key(body).map(Command::Key),
        ActionKind::Text => parse_text(body).map(Command::Text),
    }
}

/// Parses `<x> <y>` or `<x> <y> <amount> <delay>`.
pub fn parse_tap(body: &str) -> Result<TapCommand, CommandError> {
    let tokens = tokens(body);
    let (x, y, repeat) = match tokens.as_slice() {
        [x, y] => (*x, *y, None),
        [x, y, amount, delay] => (*x, *y, Some((*amount, *delay))),
        _ => return Err(format_error(ActionKind::Tap, TAP_USAGE)),
    };

    let at = Point::new(parse_coordinate("x", x)?, parse_coordinate("y", y)?);
    let repeat = match repeat {
        Some((amount, delay)) => parse_repeat(amount, delay)?,
        None => Repeat::ONCE,
    };

    Ok(TapCommand { at, repeat })
}

/// Parses `<x1> <y1> <x2> <y2> <duration>` with an optional `<amount> <delay>`.
pub fn parse_swipe(body: &str) -> Result<SwipeCommand, CommandError> {
    let tokens = tokens(body);
    let (coordinates, duration, repeat) = match tokens.as_slice() {
        [x1, y1, x2, y2, duration] => ([*x1, *y1, *x2, *y2], *duration, None),
        [x1, y1, x2, y2, duration, amount, delay] => {
            ([*x1, *y1, *x2, *y2], *duration, Some((*amount, *delay)))
        }
        _ => return Err(format_error(ActionKind::Swipe, SWIPE_USAGE)),
    };

    let [x1, y1, x2, y2] = coordinates;
    let from = Point::new(parse_coordinate("x1", x1)?, parse_coordinate("y1", y1)?);
    let to = Point::new(parse_coordinate("x2", x2)?, parse_coordinate("y2", y2)?);
    let duration_ms = duration
        .parse::<u64>()
        .map_err(|_| CommandError::Duration)?;
    let repeat = match repeat {
        Some((amount, delay)) => parse_repeat(amount, delay)?,
        None => Repeat::ONCE,
    };

    Ok(SwipeCommand {
        from,
        to,
        duration_ms,
        repeat,
    })
}

/// Parses `<keycode>` or `<keycode> <amount> <delay>`.
pub fn parse_key(body: &str) -> Result<KeyCommand, CommandError> {
    let tokens = tokens(body);
    let (keycode, repeat) = match tokens.as_slice() {
        [keycode] => (*keycode, Repeat::ONCE),
        [keycode, amount, delay] => (*keycode, parse_repeat(amount, delay)?),
        _ => return Err(format_error(ActionKind::Key, KEY_USAGE)),
    };

    Ok(KeyCommand {
        keycode: keycode.to_string(),
        repeat,
    })
}

/// Accepts any non-empty body as the text payload.
pub fn parse_text(body: &str) -> Result<TextCommand, CommandError> {
    if body.is_empty() {
        return Err(CommandError::EmptyText);
    }
    Ok(TextCommand {
        payload: body.to_string(),
    })
}

fn tokens(body: &str) -> Vec<&str> {
    body.split_whitespace().collect()
}

fn format_error(kind: ActionKind, usage: &'static str) -> CommandError {
    CommandError::Format { kind, usage }
}

fn parse_coordinate(field: &'static str, token: &str) -> Result<i32, CommandError> {
    token.parse::<i32>().map_err(|_| CommandError::Integer {
        field,
        token: token.to_string(),
    })
}

fn parse_repeat(amount: &str, delay: &str) -> Result<Repeat, CommandError> {
    let amount = amount
        .parse::<u32>()
        .ok()
        .filter(|value| *value >= 1)
        .ok_or(CommandError::Amount)?;
    let delay_ms = delay.parse::<u64>().map_err(|_| CommandError::Delay)?;
    Ok(Repeat { amount, delay_ms })
}
