use std::io::BufRead;

use crate::errors::ParseError;

use super::{is_envelope, run, Handler, Step};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceProps {
    pub path: Option<String>,
    pub history: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Path,
    History,
    HistoryHref,
}

#[derive(Default)]
struct WorkspaceHandler {
    props: WorkspaceProps,
}

impl Handler for WorkspaceHandler {
    type State = State;

    fn initial_state(&self) -> State {
        State::Init
    }

    fn start(&mut self, state: State, name: &str) -> Step<State> {
        match (state, name) {
            (State::Init, "x:path") => Step::Enter(State::Path),
            (State::Init, "x:workspace-history") => Step::Enter(State::History),
            (State::Init, n) if is_envelope(n) => Step::Pass,
            (State::History, "DAV:href") => Step::Enter(State::HistoryHref),
            _ => Step::Skip,
        }
    }

    fn end(&mut self, state: State, name: &str, text: &str) -> Result<Option<State>, ParseError> {
        let next = match (state, name) {
            (State::Path, "x:path") => {
                self.props.path = Some(text.to_string());
                State::Init
            }
            (State::HistoryHref, "DAV:href") => {
                self.props.history = Some(text.to_string());
                State::History
            }
            (State::History, "x:workspace-history") => State::Init,
            _ => return Ok(None),
        };
        Ok(Some(next))
    }
}

/// Parse a PROPFIND response describing one workspace.
pub fn parse_workspace<R: BufRead>(input: R) -> Result<WorkspaceProps, ParseError> {
    Ok(run(WorkspaceHandler::default(), input)?.props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workspace() {
        let xml = "<DAV:multistatus><DAV:response><DAV:propstat><DAV:prop>\
                   <x:path>/ws/proj/sc_comp/dev/active/</x:path>\
                   <x:workspace-history><DAV:href>/dtr/history/ws/17</DAV:href></x:workspace-history>\
                   </DAV:prop></DAV:propstat></DAV:response></DAV:multistatus>";
        let props = parse_workspace(xml.as_bytes()).unwrap();
        assert_eq!(props.path.as_deref(), Some("/ws/proj/sc_comp/dev/active/"));
        assert_eq!(props.history.as_deref(), Some("/dtr/history/ws/17"));
    }

    #[test]
    fn test_unknown_elements_do_not_change_fields() {
        let xml = "<DAV:multistatus><DAV:response><DAV:href>/dtr/ws/1</DAV:href>\
                   <DAV:propstat><DAV:prop>\
                   <x:parent><x:path>/not/this/</x:path></x:parent>\
                   <x:path>/ws/a/</x:path>\
                   <x:workspace-history><x:kind>h</x:kind><DAV:href>/dtr/h/1</DAV:href></x:workspace-history>\
                   </DAV:prop></DAV:propstat></DAV:response></DAV:multistatus>";
        let props = parse_workspace(xml.as_bytes()).unwrap();
        assert_eq!(props.path.as_deref(), Some("/ws/a/"));
        assert_eq!(props.history.as_deref(), Some("/dtr/h/1"));
    }
}
