use std::io::BufRead;

use crate::dtr::model::{split_client_id, ActivitySummary};
use crate::errors::ParseError;

use super::{run, Handler, Step};

/// Result of an activity query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityListing {
    pub activities: Vec<ActivitySummary>,
    /// Entries discarded for a missing href or a malformed client id.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Response,
    Href,
    DisplayName,
    ClientId,
    Workspace,
    WorkspaceResponse,
    WorkspaceHref,
}

#[derive(Default)]
struct Entry {
    href: Option<String>,
    display_name: Option<String>,
    workspace: Option<String>,
    client_id: Option<String>,
}

#[derive(Default)]
struct EnumerationHandler {
    current: Entry,
    listing: ActivityListing,
}

impl EnumerationHandler {
    fn finish_entry(&mut self) {
        let entry = std::mem::take(&mut self.current);
        let client = entry.client_id.as_deref().and_then(split_client_id);
        match (entry.href, client) {
            (Some(href), Some((client_host, client_path))) => {
                self.listing.activities.push(ActivitySummary {
                    href,
                    display_name: entry.display_name,
                    workspace: entry.workspace,
                    client_host,
                    client_path,
                });
            }
            _ => self.listing.dropped += 1,
        }
    }
}

impl Handler for EnumerationHandler {
    type State = State;

    fn initial_state(&self) -> State {
        State::Init
    }

    fn start(&mut self, state: State, name: &str) -> Step<State> {
        match (state, name) {
            (State::Init, "DAV:multistatus") => Step::Pass,
            (State::Init, "DAV:response") => Step::Enter(State::Response),
            (State::Response, "DAV:href") => Step::Enter(State::Href),
            (State::Response, "DAV:displayname") => Step::Enter(State::DisplayName),
            (State::Response, "XCM_CLIENT:client-id") => Step::Enter(State::ClientId),
            (State::Response, "DAV:workspace") => Step::Enter(State::Workspace),
            (State::Response, "DAV:propstat" | "DAV:prop") => Step::Pass,
            (State::Workspace, "DAV:response") => Step::Enter(State::WorkspaceResponse),
            (State::WorkspaceResponse, "DAV:href" | "href") => {
                Step::Enter(State::WorkspaceHref)
            }
            _ => Step::Skip,
        }
    }

    fn end(&mut self, state: State, name: &str, text: &str) -> Result<Option<State>, ParseError> {
        let next = match (state, name) {
            (State::Href, "DAV:href") => {
                self.current.href = Some(text.to_string());
                State::Response
            }
            (State::DisplayName, "DAV:displayname") => {
                self.current.display_name = Some(text.to_string());
                State::Response
            }
            (State::ClientId, "XCM_CLIENT:client-id") => {
                self.current.client_id = Some(text.to_string());
                State::Response
            }
            (State::WorkspaceHref, "DAV:href" | "href") => {
                self.current.workspace = Some(text.to_string());
                State::WorkspaceResponse
            }
            (State::WorkspaceResponse, "DAV:response") => State::Workspace,
            (State::Workspace, "DAV:workspace") => State::Response,
            (State::Response, "DAV:response") => {
                self.finish_entry();
                State::Init
            }
            _ => return Ok(None),
        };
        Ok(Some(next))
    }
}

/// Parse the multistatus answer to an activity query.
pub fn parse_activity_listing<R: BufRead>(input: R) -> Result<ActivityListing, ParseError> {
    Ok(run(EnumerationHandler::default(), input)?.listing)
}
