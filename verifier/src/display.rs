use telemetry_protocol::{IndicatorColor, Verdict};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Waiting,
    Authenticating,
    Showing(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    RequestReceived,
    Verified(Verdict),
    DwellElapsed,
}

/// Two 16-column LCD lines plus the indicator that goes with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub line1: &'static str,
    pub line2: &'static str,
    pub indicator: Option<IndicatorColor>,
}

const WAITING: Screen = Screen {
    line1: "Vehicle Auth",
    line2: "Waiting...",
    indicator: None,
};
const AUTHENTICATING: Screen = Screen {
    line1: "Authenticating",
    line2: "Checking tag",
    indicator: Some(IndicatorColor::Yellow),
};
const VALID: Screen = Screen {
    line1: "VIN VERIFIED",
    line2: "Data trusted",
    indicator: Some(IndicatorColor::Green),
};
const INVALID: Screen = Screen {
    line1: "AUTH FAILED",
    line2: "Data rejected",
    indicator: Some(IndicatorColor::Red),
};

impl DisplayState {
    /// Events that make no sense in the current state leave it unchanged.
    pub fn next(self, event: DisplayEvent) -> Self {
        match (self, event) {
            (DisplayState::Waiting, DisplayEvent::RequestReceived) => DisplayState::Authenticating,
            (DisplayState::Authenticating, DisplayEvent::Verified(v)) => DisplayState::Showing(v),
            (DisplayState::Showing(_), DisplayEvent::DwellElapsed) => DisplayState::Waiting,
            (state, _) => state,
        }
    }

    pub fn screen(self) -> &'static Screen {
        match self {
            DisplayState::Waiting => &WAITING,
            DisplayState::Authenticating => &AUTHENTICATING,
            DisplayState::Showing(Verdict::Valid) => &VALID,
            DisplayState::Showing(Verdict::Invalid) => &INVALID,
        }
    }
}

/// Renders a display state. LCD and LED drivers sit behind this trait.
pub trait VerdictDisplay {
    fn render(&mut self, state: DisplayState, screen: &Screen);
}

pub struct LogDisplay;

impl VerdictDisplay for LogDisplay {
    fn render(&mut self, state: DisplayState, screen: &Screen) {
        info!(
            state = ?state,
            indicator = ?screen.indicator,
            "[{}] [{}]",
            screen.line1,
            screen.line2
        );
    }
}

pub struct DisplayMachine<D: VerdictDisplay> {
    state: DisplayState,
    display: D,
}

impl<D: VerdictDisplay> DisplayMachine<D> {
    pub fn new(mut display: D) -> Self {
        let state = DisplayState::Waiting;
        display.render(state, state.screen());
        Self { state, display }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn handle(&mut self, event: DisplayEvent) -> DisplayState {
        let next = self.state.next(event);
        if next == self.state {
            debug!("Display ignored {:?} in {:?}", event, self.state);
        } else {
            self.transition(next);
        }
        self.state
    }

    /// Back to idle after a dropped connection.
    pub fn reset(&mut self) {
        if self.state != DisplayState::Waiting {
            self.transition(DisplayState::Waiting);
        }
    }

    fn transition(&mut self, next: DisplayState) {
        self.state = next;
        self.display.render(next, next.screen());
    }

    #[cfg(test)]
    pub fn display(&self) -> &D {
        &self.display
    }
}
