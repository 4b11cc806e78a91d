use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::ParseError;

use super::{is_envelope, run, Handler, Step};

const CREATION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationProps {
    pub workspace: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub isn: i64,
}

impl Default for IntegrationProps {
    fn default() -> Self {
        Self {
            workspace: None,
            creation_date: None,
            isn: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Workspace,
    WorkspaceHref,
    CreationDate,
    Isn,
}

#[derive(Default)]
struct IntegrationHandler {
    props: IntegrationProps,
}

impl Handler for IntegrationHandler {
    type State = State;

    fn initial_state(&self) -> State {
        State::Init
    }

    fn start(&mut self, state: State, name: &str) -> Step<State> {
        match (state, name) {
            (State::Init, "DAV:workspace") => Step::Enter(State::Workspace),
            (State::Init, "DAV:creationdate") => Step::Enter(State::CreationDate),
            (State::Init, "x:isn") => Step::Enter(State::Isn),
            (State::Init, n) if is_envelope(n) => Step::Pass,
            (State::Workspace, "DAV:href") => Step::Enter(State::WorkspaceHref),
            _ => Step::Skip,
        }
    }

    fn end(&mut self, state: State, name: &str, text: &str) -> Result<Option<State>, ParseError> {
        let next = match (state, name) {
            (State::WorkspaceHref, "DAV:href") => {
                self.props.workspace = Some(text.to_string());
                State::Workspace
            }
            (State::Workspace, "DAV:workspace") => State::Init,
            (State::CreationDate, "DAV:creationdate") => {
                self.props.creation_date = parse_creation_date(text)?;
                State::Init
            }
            (State::Isn, "x:isn") => {
                self.props.isn = text.parse().map_err(|_| ParseError::InvalidNumber {
                    field: "x:isn",
                    value: text.to_string(),
                })?;
                State::Init
            }
            _ => return Ok(None),
        };
        Ok(Some(next))
    }
}

fn parse_creation_date(text: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(text, CREATION_DATE_FORMAT)
        .map(|dt| Some(dt.and_utc()))
        .map_err(|_| ParseError::InvalidTimestamp {
            field: "DAV:creationdate",
            value: text.to_string(),
        })
}

/// Parse a PROPFIND response describing one integration.
pub fn parse_integration<R: BufRead>(input: R) -> Result<IntegrationProps, ParseError> {
    Ok(run(IntegrationHandler::default(), input)?.props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wrap(props: &str) -> String {
        format!(
            "<DAV:multistatus><DAV:response><DAV:href>/dtr/int/1</DAV:href>\
             <DAV:propstat><DAV:prop>{}</DAV:prop></DAV:propstat></DAV:response></DAV:multistatus>",
            props
        )
    }

    #[test]
    fn test_parse_integration() {
        let xml = wrap(
            "<DAV:workspace><DAV:href>/dtr/ws/a/</DAV:href></DAV:workspace>\
             <DAV:creationdate>2020-01-02T03:04:05Z</DAV:creationdate>\
             <x:isn>42</x:isn>",
        );
        let props = parse_integration(xml.as_bytes()).unwrap();
        assert_eq!(props.workspace.as_deref(), Some("/dtr/ws/a/"));
        assert_eq!(
            props.creation_date,
            Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(props.isn, 42);
    }

    #[test]
    fn test_defaults_when_omitted() {
        let props = parse_integration(wrap("").as_bytes()).unwrap();
        assert_eq!(props, IntegrationProps::default());
        assert_eq!(props.isn, -1);
    }

    #[test]
    fn test_empty_creation_date_is_none() {
        let xml = wrap("<DAV:creationdate></DAV:creationdate><x:isn>7</x:isn>");
        let props = parse_integration(xml.as_bytes()).unwrap();
        assert!(props.creation_date.is_none());
        assert_eq!(props.isn, 7);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        let xml = wrap("<x:isn>forty-two</x:isn>");
        assert!(matches!(
            parse_integration(xml.as_bytes()),
            Err(ParseError::InvalidNumber { field: "x:isn", .. })
        ));

        let xml = wrap("<DAV:creationdate>yesterday</DAV:creationdate>");
        assert!(matches!(
            parse_integration(xml.as_bytes()),
            Err(ParseError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_unknown_elements_do_not_change_fields() {
        let clean = wrap(
            "<DAV:workspace><DAV:href>/dtr/ws/a/</DAV:href></DAV:workspace><x:isn>3</x:isn>",
        );
        let noisy = wrap(
            "<x:comment><x:isn>99</x:isn></x:comment>\
             <DAV:workspace><x:note>n</x:note><DAV:href>/dtr/ws/a/</DAV:href></DAV:workspace>\
             <x:isn>3</x:isn><DAV:getetag>\"e\"</DAV:getetag>",
        );
        assert_eq!(
            parse_integration(noisy.as_bytes()).unwrap(),
            parse_integration(clean.as_bytes()).unwrap()
        );
    }
}
