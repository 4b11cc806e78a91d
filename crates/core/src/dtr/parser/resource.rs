use std::io::BufRead;

use chrono::{DateTime, Utc};

use crate::errors::ParseError;

use super::{is_envelope, run, Handler, Step};

/// Kind named by `x:resource-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Version,
    WorkingResource,
    File,
    Collection,
}

impl ResourceKind {
    fn from_property(value: Option<&str>) -> Result<Self, ParseError> {
        match value {
            Some("version") => Ok(Self::Version),
            Some("working_resource") => Ok(Self::WorkingResource),
            Some("file") => Ok(Self::File),
            Some("collection") => Ok(Self::Collection),
            other => Err(ParseError::UnknownResourceType(other.map(str::to_string))),
        }
    }
}

/// Properties of one resource, with predecessors still as hrefs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProps {
    pub kind: ResourceKind,
    pub name: Option<String>,
    pub path: Option<String>,
    /// Sequence number; -1 when the server did not send one.
    pub revision: i64,
    pub deleted: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub directory: bool,
    pub predecessors: Vec<String>,
    pub base_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    DisplayName,
    SequenceNumber,
    Path,
    LastModified,
    Deleted,
    ResourceType,
    PredecessorSet,
    PredecessorHref,
    BaseVersion,
    BaseVersionHref,
    DavResourceType,
    DirectoryMarker,
}

struct ResourceHandler {
    name: Option<String>,
    path: Option<String>,
    revision: i64,
    deleted: bool,
    timestamp: Option<DateTime<Utc>>,
    directory: bool,
    predecessors: Vec<String>,
    base_version: Option<String>,
    resource_type: Option<String>,
}

impl Default for ResourceHandler {
    fn default() -> Self {
        Self {
            name: None,
            path: None,
            revision: -1,
            deleted: false,
            timestamp: None,
            directory: false,
            predecessors: Vec::new(),
            base_version: None,
            resource_type: None,
        }
    }
}

impl ResourceHandler {
    fn finish(self) -> Result<ResourceProps, ParseError> {
        let kind = ResourceKind::from_property(self.resource_type.as_deref())?;
        Ok(ResourceProps {
            kind,
            name: self.name,
            path: self.path,
            revision: self.revision,
            deleted: self.deleted,
            timestamp: self.timestamp,
            directory: self.directory,
            predecessors: self.predecessors,
            base_version: self.base_version,
        })
    }
}

impl Handler for ResourceHandler {
    type State = State;

    fn initial_state(&self) -> State {
        State::Init
    }

    fn start(&mut self, state: State, name: &str) -> Step<State> {
        match (state, name) {
            (State::Init, "DAV:displayname") => Step::Enter(State::DisplayName),
            (State::Init, "x:sequence-number") => Step::Enter(State::SequenceNumber),
            (State::Init, "x:path") => Step::Enter(State::Path),
            (State::Init, "DAV:getlastmodified") => Step::Enter(State::LastModified),
            (State::Init, "x:deleted") => Step::Enter(State::Deleted),
            (State::Init, "x:resource-type") => Step::Enter(State::ResourceType),
            (State::Init, "DAV:predecessor-set") => Step::Enter(State::PredecessorSet),
            (State::Init, "x:base-version") => Step::Enter(State::BaseVersion),
            (State::Init, "DAV:resourcetype") => Step::Enter(State::DavResourceType),
            (State::Init, n) if is_envelope(n) => Step::Pass,
            (State::PredecessorSet, "DAV:href") => Step::Enter(State::PredecessorHref),
            (State::BaseVersion, "DAV:href") => Step::Enter(State::BaseVersionHref),
            (State::DavResourceType, "DAV:collection" | "DAV:working-collection") => {
                self.directory = true;
                Step::Enter(State::DirectoryMarker)
            }
            _ => Step::Skip,
        }
    }

    fn end(&mut self, state: State, name: &str, text: &str) -> Result<Option<State>, ParseError> {
        let next = match (state, name) {
            (State::DisplayName, "DAV:displayname") => {
                self.name = Some(text.to_string());
                State::Init
            }
            (State::SequenceNumber, "x:sequence-number") => {
                self.revision = text.parse().map_err(|_| ParseError::InvalidNumber {
                    field: "x:sequence-number",
                    value: text.to_string(),
                })?;
                State::Init
            }
            (State::Path, "x:path") => {
                self.path = Some(text.to_string());
                State::Init
            }
            (State::LastModified, "DAV:getlastmodified") => {
                self.timestamp = parse_last_modified(text)?;
                State::Init
            }
            (State::Deleted, "x:deleted") => {
                self.deleted = text == "T";
                State::Init
            }
            (State::ResourceType, "x:resource-type") => {
                self.resource_type = Some(text.to_lowercase());
                State::Init
            }
            (State::PredecessorHref, "DAV:href") => {
                self.predecessors.push(text.to_string());
                State::PredecessorSet
            }
            (State::PredecessorSet, "DAV:predecessor-set") => State::Init,
            (State::BaseVersionHref, "DAV:href") => {
                self.base_version = Some(text.to_string());
                State::BaseVersion
            }
            (State::BaseVersion, "x:base-version") => State::Init,
            (State::DirectoryMarker, "DAV:collection" | "DAV:working-collection") => {
                State::DavResourceType
            }
            (State::DavResourceType, "DAV:resourcetype") => State::Init,
            _ => return Ok(None),
        };
        Ok(Some(next))
    }
}

fn parse_last_modified(text: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
    if text.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc2822(text)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|_| ParseError::InvalidTimestamp {
            field: "DAV:getlastmodified",
            value: text.to_string(),
        })
}

/// Parse a PROPFIND response describing one file, collection, version or
/// working resource.
pub fn parse_resource<R: BufRead>(input: R) -> Result<ResourceProps, ParseError> {
    run(ResourceHandler::default(), input)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wrap(props: &str) -> String {
        format!(
            "<DAV:multistatus><DAV:response><DAV:href>/dtr/vh/1</DAV:href>\
             <DAV:propstat><DAV:prop>{}</DAV:prop></DAV:propstat></DAV:response></DAV:multistatus>",
            props
        )
    }

    const VERSION: &str = "<DAV:displayname>Main.java</DAV:displayname>\
        <x:sequence-number>3</x:sequence-number>\
        <x:path>/src/Main.java</x:path>\
        <DAV:getlastmodified>Mon, 03 Sep 2007 11:24:48 GMT</DAV:getlastmodified>\
        <x:deleted>F</x:deleted>\
        <x:resource-type>Version</x:resource-type>\
        <DAV:resourcetype/>\
        <DAV:predecessor-set><DAV:href>/dtr/vh/0</DAV:href></DAV:predecessor-set>";

    #[test]
    fn test_parse_version() {
        let props = parse_resource(wrap(VERSION).as_bytes()).unwrap();
        assert_eq!(props.kind, ResourceKind::Version);
        assert_eq!(props.name.as_deref(), Some("Main.java"));
        assert_eq!(props.path.as_deref(), Some("/src/Main.java"));
        assert_eq!(props.revision, 3);
        assert!(!props.deleted);
        assert!(!props.directory);
        assert_eq!(
            props.timestamp,
            Some(Utc.with_ymd_and_hms(2007, 9, 3, 11, 24, 48).unwrap())
        );
        assert_eq!(props.predecessors, vec!["/dtr/vh/0"]);
        assert!(props.base_version.is_none());
    }

    #[test]
    fn test_parse_working_collection() {
        let xml = wrap(
            "<x:resource-type>WORKING_RESOURCE</x:resource-type>\
             <x:deleted>T</x:deleted>\
             <DAV:resourcetype><DAV:working-collection/></DAV:resourcetype>\
             <x:base-version><DAV:href>/dtr/vh/base</DAV:href></x:base-version>",
        );
        let props = parse_resource(xml.as_bytes()).unwrap();
        assert_eq!(props.kind, ResourceKind::WorkingResource);
        assert!(props.deleted);
        assert!(props.directory);
        assert_eq!(props.base_version.as_deref(), Some("/dtr/vh/base"));
        assert_eq!(props.revision, -1);
    }

    #[test]
    fn test_unknown_or_missing_resource_type() {
        let xml = wrap("<x:resource-type>symlink</x:resource-type>");
        assert!(matches!(
            parse_resource(xml.as_bytes()),
            Err(ParseError::UnknownResourceType(Some(t))) if t == "symlink"
        ));

        let xml = wrap("<DAV:displayname>x</DAV:displayname>");
        assert!(matches!(
            parse_resource(xml.as_bytes()),
            Err(ParseError::UnknownResourceType(None))
        ));
    }

    #[test]
    fn test_malformed_numbers_and_dates() {
        let xml = wrap("<x:resource-type>file</x:resource-type><x:sequence-number>x</x:sequence-number>");
        assert!(matches!(
            parse_resource(xml.as_bytes()),
            Err(ParseError::InvalidNumber { .. })
        ));

        let xml = wrap("<x:resource-type>file</x:resource-type><DAV:getlastmodified>soon</DAV:getlastmodified>");
        assert!(matches!(
            parse_resource(xml.as_bytes()),
            Err(ParseError::InvalidTimestamp { .. })
        ));

        let xml = wrap("<x:resource-type>file</x:resource-type><DAV:getlastmodified></DAV:getlastmodified>");
        assert!(parse_resource(xml.as_bytes()).unwrap().timestamp.is_none());
    }

    #[test]
    fn test_unknown_elements_do_not_change_fields() {
        let noisy = VERSION
            .replace(
                "<DAV:predecessor-set>",
                "<x:checked-in><DAV:href>/elsewhere</DAV:href></x:checked-in><DAV:predecessor-set><x:meta/>",
            )
            .replace(
                "<DAV:resourcetype/>",
                "<DAV:resourcetype><DAV:principal><DAV:collection/></DAV:principal></DAV:resourcetype>",
            );
        let clean = parse_resource(wrap(VERSION).as_bytes()).unwrap();
        let parsed = parse_resource(wrap(&noisy).as_bytes()).unwrap();
        assert_eq!(parsed, clean);
    }
}
