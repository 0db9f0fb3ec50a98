//! The orchestration subject: a globally-unique workflow-instance
//! identifier encoding orchestrator name, version, initiator, and a unique
//! execution id (spec §3).
//!
//! The wire form is a single opaque string so callers can pass it through
//! transports that only understand strings; `SubjectCodec` is the only
//! place that knows how to take it apart or put it back together.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A parsed orchestration subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub orchestrator: String,
    #[serde(with = "version_serde")]
    pub version: Version,
    pub initiator: String,
    pub exec_id: Uuid,
    /// Present when this subject was minted to nest inside another
    /// orchestration; never rewritten once a record's first write stores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Subject>>,
}

mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Version, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Version, D::Error> {
        let raw = String::deserialize(d)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Inputs for minting a brand-new top-level subject.
#[derive(Debug, Clone)]
pub struct NewSubjectParams {
    pub orchestrator: String,
    pub version: Version,
    pub initiator: String,
}

/// Inputs for deriving a nested subject from a parent subject string.
#[derive(Debug, Clone)]
pub struct FromSubjectParams {
    pub subject: String,
    pub orchestrator: String,
    pub version: Version,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject string is not valid base64")]
    BadEncoding,
    #[error("subject payload is not valid JSON")]
    BadPayload,
    #[error("subject version `{0}` is not valid semver")]
    BadVersion(String),
}

/// Wire prefix for the base64(JSON) subject segment (spec §4).
const SUBJECT_PREFIX: &str = "subj-B64:";

/// The reserved `event.data` field an init event carries its parent
/// workflow's subject in (spec §4.4). Distinct from `Subject.parent`,
/// which embeds lineage in the subject string itself for composability;
/// this field is the one the controller actually reads to resolve a
/// fresh record's `parent_subject`.
pub const PARENT_SUBJECT_DATA_FIELD: &str = "parentSubject$$";

/// Codec for the opaque subject string: `parse`/`new`/`from`/`is_valid`
/// exactly as specified in spec §3/§6.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectCodec;

impl SubjectCodec {
    /// Parse a wire subject string into its structured form.
    pub fn parse(&self, raw: &str) -> Result<Subject, SubjectError> {
        let encoded = raw.strip_prefix(SUBJECT_PREFIX).ok_or(SubjectError::BadEncoding)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| SubjectError::BadEncoding)?;
        serde_json::from_slice(&bytes).map_err(|_| SubjectError::BadPayload)
    }

    /// Quick structural validity check without materializing a `Subject`.
    pub fn is_valid(&self, raw: &str) -> bool {
        self.parse(raw).is_ok()
    }

    /// Mint a fresh top-level subject (no parent).
    pub fn new(&self, params: NewSubjectParams) -> String {
        self.encode(&Subject {
            orchestrator: params.orchestrator,
            version: params.version,
            initiator: params.initiator,
            exec_id: Uuid::new_v4(),
            parent: None,
        })
    }

    /// Derive a nested subject whose parent chain includes `params.subject`.
    ///
    /// The nested subject's initiator is the parent's orchestrator name, so
    /// a completion event can always be routed back by walking `.parent`.
    pub fn from(&self, params: FromSubjectParams) -> Result<String, SubjectError> {
        let parent = self.parse(&params.subject)?;
        let initiator = parent.orchestrator.clone();
        let child = Subject {
            orchestrator: params.orchestrator,
            version: params.version,
            initiator,
            exec_id: Uuid::new_v4(),
            parent: Some(Box::new(parent)),
        };
        Ok(self.encode(&child))
    }

    /// Re-serialize a parsed `Subject` back to its wire form. Used to
    /// recover a parent's original subject string from a child's
    /// `Subject.parent` link.
    pub fn encode(&self, subject: &Subject) -> String {
        let json = serde_json::to_vec(subject).expect("Subject serializes infallibly");
        format!("{SUBJECT_PREFIX}{}", URL_SAFE_NO_PAD.encode(json))
    }
}
