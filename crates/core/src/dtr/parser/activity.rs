use std::io::BufRead;

use crate::errors::ParseError;

use super::{is_envelope, run, Handler, Step};

/// Properties of a single activity, with children still as hrefs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityProps {
    pub display_name: Option<String>,
    pub workspace: Option<String>,
    pub originator: Option<String>,
    pub client_id: Option<String>,
    pub version_set_state: Option<String>,
    pub integrations: Vec<String>,
    pub version_set: Vec<String>,
    pub content_set: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    DisplayName,
    Workspace,
    WorkspaceHref,
    Originator,
    ClientId,
    VersionSetState,
    IntegrationSet,
    IntegrationHref,
    VersionSet,
    VersionHref,
    ContentSet,
    ContentHref,
}

#[derive(Default)]
struct ActivityHandler {
    props: ActivityProps,
}

impl Handler for ActivityHandler {
    type State = State;

    fn initial_state(&self) -> State {
        State::Init
    }

    fn start(&mut self, state: State, name: &str) -> Step<State> {
        match (state, name) {
            (State::Init, "DAV:displayname") => Step::Enter(State::DisplayName),
            (State::Init, "DAV:workspace") => Step::Enter(State::Workspace),
            (State::Init, "x:originator") => Step::Enter(State::Originator),
            (State::Init, "XCM_CLIENT:client-id") => Step::Enter(State::ClientId),
            (State::Init, "x:version-set-state") => Step::Enter(State::VersionSetState),
            (State::Init, "x:integration-set") => Step::Enter(State::IntegrationSet),
            (State::Init, "x:version-set") => Step::Enter(State::VersionSet),
            (State::Init, "x:activity-content-set") => Step::Enter(State::ContentSet),
            (State::Init, n) if is_envelope(n) => Step::Pass,
            (State::Workspace, "DAV:href") => Step::Enter(State::WorkspaceHref),
            (State::IntegrationSet, "DAV:href") => Step::Enter(State::IntegrationHref),
            (State::VersionSet, "DAV:href") => Step::Enter(State::VersionHref),
            (State::ContentSet, "DAV:href") => Step::Enter(State::ContentHref),
            _ => Step::Skip,
        }
    }

    fn end(&mut self, state: State, name: &str, text: &str) -> Result<Option<State>, ParseError> {
        let p = &mut self.props;
        let next = match (state, name) {
            (State::DisplayName, "DAV:displayname") => {
                p.display_name = Some(text.to_string());
                State::Init
            }
            (State::WorkspaceHref, "DAV:href") => {
                p.workspace = Some(text.to_string());
                State::Workspace
            }
            (State::Workspace, "DAV:workspace") => State::Init,
            (State::Originator, "x:originator") => {
                p.originator = Some(text.to_string());
                State::Init
            }
            (State::ClientId, "XCM_CLIENT:client-id") => {
                p.client_id = Some(text.to_string());
                State::Init
            }
            (State::VersionSetState, "x:version-set-state") => {
                p.version_set_state = Some(text.to_string());
                State::Init
            }
            (State::IntegrationHref, "DAV:href") => {
                p.integrations.push(text.to_string());
                State::IntegrationSet
            }
            (State::IntegrationSet, "x:integration-set") => State::Init,
            (State::VersionHref, "DAV:href") => {
                p.version_set.push(text.to_string());
                State::VersionSet
            }
            (State::VersionSet, "x:version-set") => State::Init,
            (State::ContentHref, "DAV:href") => {
                p.content_set.push(text.to_string());
                State::ContentSet
            }
            (State::ContentSet, "x:activity-content-set") => State::Init,
            _ => return Ok(None),
        };
        Ok(Some(next))
    }
}

/// Parse a PROPFIND response describing one activity.
pub fn parse_activity<R: BufRead>(input: R) -> Result<ActivityProps, ParseError> {
    Ok(run(ActivityHandler::default(), input)?.props)
}
