//! Process telemetry: tracing setup and a small formatter for rendering
//! execution event streams to a terminal or a log sink.

use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::runtime::events::ExecutionEvent;

const STEP_COLOR: &str = "\x1b[32m"; // green
const TERMINAL_COLOR: &str = "\x1b[35m"; // magenta
const RESET_COLOR: &str = "\x1b[0m";

/// Install the global tracing subscriber and miette's panic hook.
///
/// The filter honors `RUST_LOG` when set, defaulting to `error` plus this
/// crate at `info`. Call once at process startup; later calls are ignored.
pub fn init_telemetry() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("error,flowloom=info"))
        .expect("default env filter is valid");

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();

    miette::set_panic_hook();
}

/// Whether rendered event lines carry ANSI color codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Color when stderr is a terminal.
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    #[must_use]
    pub fn is_colored(&self) -> bool {
        match self {
            Self::Auto => std::io::stderr().is_terminal(),
            Self::Colored => true,
            Self::Plain => false,
        }
    }
}

/// Renders execution events as single display lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventFormatter {
    mode: FormatterMode,
}

impl EventFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn render(&self, event: &ExecutionEvent) -> String {
        let (color, body) = match event {
            ExecutionEvent::Step(step) => (
                STEP_COLOR,
                format!("step  {} at {}", step.node, step.at.format("%H:%M:%S%.3f")),
            ),
            ExecutionEvent::Interrupted { node, payload } => (
                TERMINAL_COLOR,
                format!("interrupted at {node}: {payload}"),
            ),
            ExecutionEvent::Completed { state } => (
                TERMINAL_COLOR,
                format!("completed after {} step(s)", state.steps.len()),
            ),
            ExecutionEvent::Failed { error } => (TERMINAL_COLOR, format!("failed: {error}")),
        };
        if self.mode.is_colored() {
            format!("{color}{body}{RESET_COLOR}")
        } else {
            body
        }
    }
}
