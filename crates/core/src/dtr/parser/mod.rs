//! Streaming parsers for DTR multistatus responses.
//!
//! Every parser is a small state machine fed start/end/text events by a
//! shared driver. Elements a parser does not know about are skipped whole:
//! the driver saves the current state in a single slot, counts the nesting
//! of the unknown subtree, and restores the saved state once the subtree
//! closes. Servers add properties freely, so this must never fail.

mod activity;
mod enumeration;
mod integration;
mod resource;
mod workspace;

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::ParseError;

pub use activity::{parse_activity, ActivityProps};
pub use enumeration::{parse_activity_listing, ActivityListing};
pub use integration::{parse_integration, IntegrationProps};
pub use resource::{parse_resource, ResourceKind, ResourceProps};
pub use workspace::{parse_workspace, WorkspaceProps};

/// What a handler wants done with an element that just opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step<S> {
    /// Move to a new known state.
    Enter(S),
    /// Envelope element: stay in the current state.
    Pass,
    /// Unknown element: skip it and everything below it.
    Skip,
}

/// One of the five response vocabularies.
pub(crate) trait Handler {
    type State: Copy + Eq + std::fmt::Debug;

    fn initial_state(&self) -> Self::State;

    fn start(&mut self, state: Self::State, name: &str) -> Step<Self::State>;

    /// Called when an element closes in a known state, with the character
    /// data collected since the last tag. Returns the next state, or `None`
    /// to stay put.
    fn end(
        &mut self,
        state: Self::State,
        name: &str,
        text: &str,
    ) -> Result<Option<Self::State>, ParseError>;
}

pub(crate) fn is_envelope(name: &str) -> bool {
    matches!(
        name,
        "DAV:multistatus" | "DAV:response" | "DAV:propstat" | "DAV:prop"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position<S> {
    Known(S),
    Unknown,
}

/// Drives a [`Handler`] and owns the skip-unknown-subtree bookkeeping.
struct Machine<H: Handler> {
    handler: H,
    position: Position<H::State>,
    saved: Option<H::State>,
    unknown_depth: usize,
    text: String,
}

impl<H: Handler> Machine<H> {
    fn new(handler: H) -> Self {
        let initial = handler.initial_state();
        Self {
            handler,
            position: Position::Known(initial),
            saved: None,
            unknown_depth: 0,
            text: String::new(),
        }
    }

    fn start(&mut self, name: &str) {
        match self.position {
            Position::Unknown => self.unknown_depth += 1,
            Position::Known(state) => match self.handler.start(state, name) {
                Step::Enter(next) => self.position = Position::Known(next),
                Step::Pass => {}
                Step::Skip => {
                    self.saved = Some(state);
                    self.position = Position::Unknown;
                    self.unknown_depth = 1;
                }
            },
        }
        self.text.clear();
    }

    fn end(&mut self, name: &str) -> Result<(), ParseError> {
        match self.position {
            Position::Unknown => {
                self.unknown_depth -= 1;
                if self.unknown_depth == 0 {
                    let restored = self
                        .saved
                        .take()
                        .unwrap_or_else(|| self.handler.initial_state());
                    self.position = Position::Known(restored);
                }
            }
            Position::Known(state) => {
                if let Some(next) = self.handler.end(state, name, &self.text)? {
                    self.position = Position::Known(next);
                }
            }
        }
        self.text.clear();
        Ok(())
    }

    fn text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }
}

fn element_name(raw: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(raw).map_err(|e| ParseError::Xml(e.to_string()))
}

/// Feed `input` through `handler` and hand the handler back.
pub(crate) fn run<H: Handler, R: BufRead>(handler: H, input: R) -> Result<H, ParseError> {
    let mut reader = Reader::from_reader(input);
    let mut machine = Machine::new(handler);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => machine.start(element_name(e.name().as_ref())?),
            Ok(Event::End(e)) => machine.end(element_name(e.name().as_ref())?)?,
            Ok(Event::Empty(e)) => {
                let qname = e.name();
                let name = element_name(qname.as_ref())?;
                machine.start(name);
                machine.end(name)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                machine.text(&text);
            }
            Ok(Event::CData(c)) => {
                let bytes = c.into_inner();
                machine.text(&String::from_utf8_lossy(&bytes));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
        buf.clear();
    }

    Ok(machine.handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every text value closed in its single capturing state.
    struct Recorder {
        values: Vec<String>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum RecState {
        Init,
        Value,
    }

    impl Handler for Recorder {
        type State = RecState;

        fn initial_state(&self) -> RecState {
            RecState::Init
        }

        fn start(&mut self, state: RecState, name: &str) -> Step<RecState> {
            match (state, name) {
                (RecState::Init, "v") => Step::Enter(RecState::Value),
                (RecState::Init, "root") => Step::Pass,
                _ => Step::Skip,
            }
        }

        fn end(
            &mut self,
            state: RecState,
            name: &str,
            text: &str,
        ) -> Result<Option<RecState>, ParseError> {
            if state == RecState::Value && name == "v" {
                self.values.push(text.to_string());
                return Ok(Some(RecState::Init));
            }
            Ok(None)
        }
    }

    fn record(xml: &str) -> Vec<String> {
        run(Recorder { values: Vec::new() }, xml.as_bytes())
            .unwrap()
            .values
    }

    #[test]
    fn test_skips_nested_unknown_subtree() {
        let xml = "<root><v>a</v><x><v>hidden</v><y><v>deeper</v></y></x><v>b</v></root>";
        assert_eq!(record(xml), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_known_element_closes_with_no_text() {
        let xml = "<root><v/><v>a</v><v/></root>";
        assert_eq!(record(xml), vec!["", "a", ""]);
    }

    #[test]
    fn test_empty_unknown_element_restores_state() {
        let xml = "<root><junk/><v>a</v></root>";
        assert_eq!(record(xml), vec!["a"]);
    }

    #[test]
    fn test_entities_and_cdata_in_text() {
        let xml = "<root><v>a &amp; b</v><v><![CDATA[<raw>]]></v></root>";
        assert_eq!(record(xml), vec!["a & b", "<raw>"]);
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let result = run(Recorder { values: Vec::new() }, "<root><v>a</x></root>".as_bytes());
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }
}
